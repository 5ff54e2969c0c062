use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use super::{expiry_from_now, CacheEntry, CacheError, CacheResult, CacheStore};

const CACHE_SCHEMA: &str = include_str!("../../sql/cache.sql");

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

#[derive(Debug, Clone)]
pub struct SqliteCacheStoreBuilder {
    path: Option<PathBuf>,
    create_if_missing: bool,
}

impl Default for SqliteCacheStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
        }
    }
}

impl SqliteCacheStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> CacheResult<SqliteCacheStore> {
        let path = self.path.ok_or(CacheError::MissingStore)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
        if self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteCacheStore { path, flags })
    }
}

/// Cache entries persisted in a SQLite file. Each call opens its own
/// connection, so the store is freely shareable across tasks.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteCacheStore {
    pub fn builder() -> SqliteCacheStoreBuilder {
        SqliteCacheStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> CacheResult<Self> {
        SqliteCacheStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> CacheResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            CacheError::Unavailable {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| CacheError::Unavailable {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> CacheResult<()> {
        let conn = self.open()?;
        conn.execute_batch(CACHE_SCHEMA)?;
        Ok(())
    }

    /// Full entry, including its expiry, when present and unexpired.
    pub fn entry(&self, fingerprint: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.open()?;
        let now = Utc::now().timestamp_millis();
        let row = conn
            .query_row(
                "SELECT file_path, expires_at FROM cache_entries
                 WHERE fingerprint = ?1 AND expires_at > ?2",
                params![fingerprint, now],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(file_path, expires_at)| CacheEntry {
            fingerprint: fingerprint.to_string(),
            file_path: PathBuf::from(file_path),
            expires_at: Utc
                .timestamp_millis_opt(expires_at)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }
}

impl CacheStore for SqliteCacheStore {
    fn put(&self, fingerprint: &str, file_path: &Path, ttl: Duration) -> CacheResult<()> {
        let path = file_path
            .to_str()
            .ok_or_else(|| CacheError::InvalidPath(fingerprint.to_string()))?;
        let conn = self.open()?;
        let now = Utc::now().timestamp_millis();
        let expires_at = expiry_from_now(ttl).timestamp_millis();
        conn.execute(
            "INSERT INTO cache_entries (fingerprint, file_path, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(fingerprint) DO UPDATE SET
                file_path = excluded.file_path,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![fingerprint, path, now, expires_at],
        )?;
        Ok(())
    }

    fn get(&self, fingerprint: &str) -> CacheResult<Option<PathBuf>> {
        Ok(self.entry(fingerprint)?.map(|entry| entry.file_path))
    }

    fn delete(&self, fingerprint: &str) -> CacheResult<()> {
        let conn = self.open()?;
        conn.execute(
            "DELETE FROM cache_entries WHERE fingerprint = ?1",
            params![fingerprint],
        )?;
        Ok(())
    }

    fn purge_expired(&self) -> CacheResult<usize> {
        let conn = self.open()?;
        let now = Utc::now().timestamp_millis();
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![now],
        )?;
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        Ok(removed)
    }

    fn ping(&self) -> CacheResult<()> {
        let conn = self.open()?;
        conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(())
    }
}
