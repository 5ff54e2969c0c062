//! Turning a [`FetchRequest`] into a file on disk with the external
//! extractor.

mod command;
mod error;
mod runner;

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::DownloaderSection;
use crate::media::{FetchRequest, OutputFormat};

pub use command::{
    audio_bitrate, video_selector, CommandBuilder, CommandSpec, BEST_AUDIO_QUALITY,
    BEST_VIDEO_SELECTOR,
};
pub use error::{DownloadError, DownloadResult};
pub use runner::{CompletedRun, ProcessRunner, DEFAULT_STDERR_LIMIT};

/// A single extraction: what to fetch and where the result must land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractJob {
    pub request: FetchRequest,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub size_bytes: u64,
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Produce `job.output_path`, or fail without leaving a usable file there.
    async fn extract(&self, job: &ExtractJob) -> DownloadResult<DownloadedFile>;
}

/// [`MediaExtractor`] backed by a yt-dlp compatible binary.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    builder: CommandBuilder,
    runner: ProcessRunner,
}

impl YtDlpExtractor {
    pub fn new(builder: CommandBuilder, runner: ProcessRunner) -> Self {
        Self { builder, runner }
    }

    pub fn from_config(config: &DownloaderSection, cookies: Option<PathBuf>) -> Self {
        let mut builder = CommandBuilder::from_config(config);
        if let Some(path) = cookies {
            builder = builder.with_cookies(path);
        }
        Self::new(builder, ProcessRunner::new(config.timeout()))
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, job: &ExtractJob) -> DownloadResult<DownloadedFile> {
        let spec = self.builder.build(&job.request, &job.output_path);
        info!(
            url = %job.request.source_url,
            format = %job.request.format,
            quality = %job.request.normalized_quality(),
            "starting download"
        );
        debug!(command = %spec.display(), "downloader command");
        let run = self.runner.run(&spec).await?;
        info!(
            path = %run.output_path.display(),
            size_bytes = run.size_bytes,
            "download finished"
        );
        Ok(DownloadedFile {
            path: run.output_path,
            format: job.request.format,
            size_bytes: run.size_bytes,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    // Stand-in extractor: writes a byte to the path following `-o`.
    fn fake_binary(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("fake-yt-dlp");
        let script = "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; fi\n  shift\ndone\nprintf 'media' > \"$out\"\n";
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn extractor_reports_downloaded_file() {
        let dir = TempDir::new().unwrap();
        let builder = CommandBuilder::new(fake_binary(&dir), "/usr/bin/ffmpeg");
        let extractor = YtDlpExtractor::new(
            builder,
            ProcessRunner::new(std::time::Duration::from_secs(10)),
        );
        let job = ExtractJob {
            request: FetchRequest::new("https://example/audio", OutputFormat::Mp3, "128k"),
            output_path: dir.path().join("out.mp3"),
        };
        let file = extractor.extract(&job).await.unwrap();
        assert_eq!(file.path, job.output_path);
        assert_eq!(file.format, OutputFormat::Mp3);
        assert_eq!(file.size_bytes, 5);
    }
}
