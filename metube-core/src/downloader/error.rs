use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("downloader exited with status {status:?}: {stderr}")]
    ExternalToolFailure { status: Option<i32>, stderr: String },
    #[error("downloader reported success but produced no file at {path}")]
    FileNotProduced { path: PathBuf },
    #[error("downloader did not finish within {after:?}")]
    Timeout { after: Duration },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type DownloadResult<T> = Result<T, DownloadError>;
