use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use super::{CacheEntry, CacheResult, CacheStore};

/// In-process cache backend. Entries do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn put(&self, fingerprint: &str, file_path: &Path, ttl: Duration) -> CacheResult<()> {
        let entry = CacheEntry::new(fingerprint, file_path.to_path_buf(), ttl);
        self.entries.write().insert(fingerprint.to_string(), entry);
        Ok(())
    }

    fn get(&self, fingerprint: &str) -> CacheResult<Option<PathBuf>> {
        let now = Utc::now();
        {
            let entries = self.entries.read();
            match entries.get(fingerprint) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired_at(now) => {
                    return Ok(Some(entry.file_path.clone()))
                }
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write();
        if entries
            .get(fingerprint)
            .map(|entry| entry.is_expired_at(now))
            .unwrap_or(false)
        {
            entries.remove(fingerprint);
        }
        Ok(None)
    }

    fn delete(&self, fingerprint: &str) -> CacheResult<()> {
        self.entries.write().remove(fingerprint);
        Ok(())
    }

    fn purge_expired(&self) -> CacheResult<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(before - entries.len())
    }

    fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
