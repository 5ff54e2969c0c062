//! Fingerprint → file path store with time-based expiry.
//!
//! Stores only answer with paths whose entry has not yet expired. They do not
//! check the file itself; callers verify the path before trusting it.

mod memory;
mod sqlite;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryCacheStore;
pub use sqlite::{SqliteCacheStore, SqliteCacheStoreBuilder};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable at {path}: {source}")]
    Unavailable {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("cache path not configured")]
    MissingStore,
    #[error("cache query failed: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("cache entry for {0} holds a non utf-8 path")]
    InvalidPath(String),
    #[error("cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub file_path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, file_path: PathBuf, ttl: Duration) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            file_path,
            expires_at: expiry_from_now(ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub trait CacheStore: Send + Sync {
    /// Store `file_path` under `fingerprint`, replacing any previous entry.
    fn put(&self, fingerprint: &str, file_path: &Path, ttl: Duration) -> CacheResult<()>;

    /// Path stored under `fingerprint`, or `None` when absent or expired.
    fn get(&self, fingerprint: &str) -> CacheResult<Option<PathBuf>>;

    fn delete(&self, fingerprint: &str) -> CacheResult<()>;

    /// Drop every expired entry, returning how many were removed.
    fn purge_expired(&self) -> CacheResult<usize>;

    /// Cheap reachability check used at startup and by the health endpoint.
    fn ping(&self) -> CacheResult<()>;
}

// Ten years; longer TTLs are clamped.
const MAX_TTL_MILLIS: u128 = 10 * 365 * 24 * 3600 * 1000;

pub(crate) fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    let millis = ttl.as_millis().min(MAX_TTL_MILLIS) as i64;
    Utc::now() + chrono::Duration::milliseconds(millis)
}
