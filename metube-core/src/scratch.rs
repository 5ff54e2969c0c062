use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::media::OutputFormat;

/// Writable location for transient downloads.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub bytes_freed: u64,
    pub skipped: usize,
}

impl ScratchDir {
    /// Create the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh, unused output path for `format`.
    pub fn allocate(&self, format: OutputFormat) -> PathBuf {
        self.root
            .join(format!("{}.{}", Uuid::new_v4(), format.extension()))
    }

    /// Remove `path` and every file yt-dlp derived from it: the `.part` file,
    /// per-stream intermediates such as `<id>.f137.mp4` and their own `.part`
    /// files. Files that are already gone are not an error.
    pub async fn remove_best_effort(&self, path: &Path) {
        let mut targets = vec![path.to_path_buf()];
        targets.extend(self.derived_files(path).await);
        for candidate in targets {
            match tokio::fs::remove_file(&candidate).await {
                Ok(()) => debug!(path = %candidate.display(), "removed scratch file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        path = %candidate.display(),
                        error = %err,
                        "failed to remove scratch file"
                    )
                }
            }
        }
    }

    /// Files next to `path` whose name starts with its stem and a dot.
    async fn derived_files(&self, path: &Path) -> Vec<PathBuf> {
        let (Some(parent), Some(stem)) = (path.parent(), path.file_stem()) else {
            return Vec::new();
        };
        let prefix = format!("{}.", stem.to_string_lossy());
        let mut entries = match tokio::fs::read_dir(parent).await {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(dir = %parent.display(), error = %err, "failed to list scratch dir");
                }
                return Vec::new();
            }
        };
        let mut found = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if is_file && entry.file_name().to_string_lossy().starts_with(&prefix) {
                found.push(entry.path());
            }
        }
        found
    }

    /// Delete regular files older than `max_age`, never touching `keep`.
    pub fn sweep(&self, max_age: Duration, keep: &[PathBuf]) -> SweepReport {
        let mut report = SweepReport::default();
        let now = SystemTime::now();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if keep.iter().any(|kept| kept == path) {
                report.skipped += 1;
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes_freed += metadata.len();
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to sweep scratch file");
                    report.skipped += 1;
                }
            }
        }
        report
    }
}

/// True when `path` is an existing regular file with content.
pub async fn is_usable_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.is_file() && metadata.len() > 0,
        Err(_) => false,
    }
}
