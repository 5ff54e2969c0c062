pub mod cache;
pub mod config;
pub mod credentials;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod media;
pub mod scratch;
pub mod stream;

pub use cache::{
    CacheEntry, CacheError, CacheResult, CacheStore, MemoryCacheStore, SqliteCacheStore,
    SqliteCacheStoreBuilder,
};
pub use config::{
    load_metube_config, CacheBackendKind, CacheSection, CleanupSection, CredentialsSection,
    DownloaderSection, MetubeConfig, PathsSection, ServerSection,
};
pub use credentials::CredentialError;
pub use downloader::{
    CommandBuilder, CommandSpec, CompletedRun, DownloadError, DownloadResult, DownloadedFile,
    ExtractJob, MediaExtractor, ProcessRunner, YtDlpExtractor,
};
pub use error::{ConfigError, Result};
pub use fetch::{
    request_from_parts, CacheOutcome, FetchError, FetchOrchestrator, FetchResult, FetchedMedia,
};
pub use media::{FetchRequest, Fingerprint, MediaKind, OutputFormat, UnsupportedFormat};
pub use scratch::{ScratchDir, SweepReport};
pub use stream::{MediaStream, StreamError, StreamResult};
