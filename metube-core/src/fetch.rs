//! Request handling: cache lookup, deduplicated download, cache fill.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStore};
use crate::downloader::{DownloadError, DownloadedFile, ExtractJob, MediaExtractor};
use crate::media::{
    FetchRequest, Fingerprint, OutputFormat, UnsupportedFormat, DEFAULT_QUALITY,
};
use crate::scratch::{is_usable_file, ScratchDir};

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("download failed: {0}")]
    DownloadFailed(Arc<DownloadError>),
    #[error("downloaded file missing at {path}")]
    MissingFile { path: PathBuf },
}

impl From<UnsupportedFormat> for FetchError {
    fn from(error: UnsupportedFormat) -> Self {
        FetchError::InvalidRequest(error.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub size_bytes: u64,
    pub cache: CacheOutcome,
}

/// Build a [`FetchRequest`] from loosely typed inbound fields. Missing or
/// blank format and quality fall back to their defaults.
pub fn request_from_parts(
    url: &str,
    format: Option<&str>,
    quality: Option<&str>,
) -> FetchResult<FetchRequest> {
    let format = match format.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value.parse::<OutputFormat>()?,
        None => OutputFormat::default(),
    };
    let quality = quality
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_QUALITY);
    Ok(FetchRequest::new(url, format, quality))
}

fn validate(request: FetchRequest) -> FetchResult<FetchRequest> {
    let url = request.source_url.trim();
    if url.is_empty() {
        return Err(FetchError::InvalidRequest("url is required".into()));
    }
    let parsed = Url::parse(url)
        .map_err(|err| FetchError::InvalidRequest(format!("invalid url {url}: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidRequest(format!(
            "unsupported url scheme: {}",
            parsed.scheme()
        )));
    }
    Ok(FetchRequest {
        source_url: url.to_string(),
        ..request
    })
}

type DownloadOutcome = Result<DownloadedFile, Arc<DownloadError>>;
type SharedDownload = Shared<BoxFuture<'static, DownloadOutcome>>;
type InFlight = HashMap<Fingerprint, SharedDownload>;

#[derive(Clone)]
pub struct FetchOrchestrator {
    cache: Arc<dyn CacheStore>,
    extractor: Arc<dyn MediaExtractor>,
    scratch: ScratchDir,
    ttl: Duration,
    inflight: Arc<Mutex<InFlight>>,
}

impl fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("scratch", &self.scratch)
            .field("ttl", &self.ttl)
            .field(
                "in_flight",
                &self.inflight.try_lock().map(|inflight| inflight.len()).ok(),
            )
            .finish()
    }
}

impl FetchOrchestrator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        extractor: Arc<dyn MediaExtractor>,
        scratch: ScratchDir,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            extractor,
            scratch,
            ttl,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Downloads currently running.
    pub async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }

    pub async fn ping_cache(&self) -> CacheResult<()> {
        self.with_cache(|cache| cache.ping()).await
    }

    pub async fn purge_expired_cache(&self) -> CacheResult<usize> {
        self.with_cache(|cache| cache.purge_expired()).await
    }

    pub async fn handle_request(&self, request: FetchRequest) -> FetchResult<FetchedMedia> {
        let request = validate(request)?;
        let fingerprint = request.fingerprint();

        if let Some(media) = self.cached(&request, &fingerprint).await {
            return Ok(media);
        }

        let download = {
            let mut inflight = self.inflight.lock().await;
            let existing = inflight.get(&fingerprint).cloned();
            match existing {
                Some(existing) => {
                    debug!(fingerprint = %fingerprint, "joining in-flight download");
                    existing
                }
                None => {
                    // A download may have finished since the first lookup.
                    if let Some(media) = self.cached(&request, &fingerprint).await {
                        return Ok(media);
                    }
                    self.start_download(&mut inflight, &request, &fingerprint)
                }
            }
        };

        let file = download.await.map_err(FetchError::DownloadFailed)?;
        if !is_usable_file(&file.path).await {
            return Err(FetchError::MissingFile { path: file.path });
        }
        Ok(FetchedMedia {
            path: file.path,
            format: file.format,
            size_bytes: file.size_bytes,
            cache: CacheOutcome::Miss,
        })
    }

    /// Run a store call on the blocking pool.
    async fn with_cache<T, F>(&self, call: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CacheStore) -> CacheResult<T> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || call(cache.as_ref())).await?
    }

    async fn cached(
        &self,
        request: &FetchRequest,
        fingerprint: &Fingerprint,
    ) -> Option<FetchedMedia> {
        let path = self.lookup(fingerprint).await?;
        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or_default();
        debug!(fingerprint = %fingerprint, path = %path.display(), "cache hit");
        Some(FetchedMedia {
            path,
            format: request.format,
            size_bytes,
            cache: CacheOutcome::Hit,
        })
    }

    /// Cached path for `fingerprint` if the file behind it is still usable.
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let key = fingerprint.as_str().to_string();
        let path = match self.with_cache(move |cache| cache.get(&key)).await {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    fingerprint = %fingerprint,
                    error = %err,
                    "cache unavailable, treating as miss"
                );
                return None;
            }
        };
        if is_usable_file(&path).await {
            return Some(path);
        }
        info!(fingerprint = %fingerprint, path = %path.display(), "dropping stale cache entry");
        let key = fingerprint.as_str().to_string();
        if let Err(err) = self.with_cache(move |cache| cache.delete(&key)).await {
            warn!(fingerprint = %fingerprint, error = %err, "failed to drop stale cache entry");
        }
        None
    }

    /// Start a download for `fingerprint` and register it in `inflight`.
    ///
    /// The download runs on its own task so it completes and fills the cache
    /// even when every waiting client has gone away.
    fn start_download(
        &self,
        inflight: &mut InFlight,
        request: &FetchRequest,
        fingerprint: &Fingerprint,
    ) -> SharedDownload {
        let job = ExtractJob {
            request: request.clone(),
            output_path: self.scratch.allocate(request.format),
        };
        let output_path = job.output_path.clone();
        let key = fingerprint.clone();
        let worker = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = worker.download_and_store(&key, job).await;
            worker.inflight.lock().await.remove(&key);
            outcome
        });

        let registry = Arc::clone(&self.inflight);
        let key = fingerprint.clone();
        let shared = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    registry.lock().await.remove(&key);
                    Err(Arc::new(DownloadError::Io {
                        path: output_path,
                        source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
                    }))
                }
            }
        }
        .boxed()
        .shared();
        inflight.insert(fingerprint.clone(), shared.clone());
        shared
    }

    async fn download_and_store(
        &self,
        fingerprint: &Fingerprint,
        job: ExtractJob,
    ) -> DownloadOutcome {
        match self.extractor.extract(&job).await {
            Ok(file) => {
                let key = fingerprint.as_str().to_string();
                let path = file.path.clone();
                let ttl = self.ttl;
                let stored = self
                    .with_cache(move |cache| cache.put(&key, &path, ttl))
                    .await;
                if let Err(err) = stored {
                    warn!(
                        fingerprint = %fingerprint,
                        error = %err,
                        "failed to record download in cache"
                    );
                }
                Ok(file)
            }
            Err(err) => {
                warn!(url = %job.request.source_url, error = %err, "download failed");
                self.scratch.remove_best_effort(&job.output_path).await;
                Err(Arc::new(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_fall_back_to_defaults() {
        let request = request_from_parts("https://example/video", None, Some("  ")).unwrap();
        assert_eq!(request.format, OutputFormat::Mp4);
        assert_eq!(request.quality, "best");

        let request =
            request_from_parts("https://example/audio", Some("MP3"), Some("256k")).unwrap();
        assert_eq!(request.format, OutputFormat::Mp3);
        assert_eq!(request.quality, "256k");
    }

    #[test]
    fn unknown_format_is_invalid_request() {
        let err = request_from_parts("https://example/video", Some("avi"), None).unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[test]
    fn validation_requires_http_urls() {
        let blank = FetchRequest::new("   ", OutputFormat::Mp4, "best");
        assert!(matches!(validate(blank), Err(FetchError::InvalidRequest(_))));

        let relative = FetchRequest::new("not a url", OutputFormat::Mp4, "best");
        assert!(matches!(validate(relative), Err(FetchError::InvalidRequest(_))));

        let file = FetchRequest::new("file:///etc/passwd", OutputFormat::Mp4, "best");
        assert!(matches!(validate(file), Err(FetchError::InvalidRequest(_))));

        let padded = FetchRequest::new(" https://example/video ", OutputFormat::Mp4, "best");
        assert_eq!(validate(padded).unwrap().source_url, "https://example/video");
    }
}
