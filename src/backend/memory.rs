//! In-process memory store.
//!
//! The lowest common denominator: always available, shared by every worker
//! in the process, gone on restart. Expiry is lazy; an expired entry is
//! dropped the next time it is read.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::config::BackendKind;
use crate::entry::CacheEntry;
use crate::error::BackendError;
use crate::key::CacheKey;
use crate::lock::{rw_read, rw_write};

use super::CacheBackend;

const SOURCE: &str = "backend::memory";

pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, BackendError> {
        let now = OffsetDateTime::now_utc();
        {
            let entries = rw_read(&self.entries, SOURCE, "get");
            match entries.get(key.as_str()) {
                Some(entry) if entry.is_fresh(now) => return Ok(Some(entry.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: evict lazily under the write lock.
        rw_write(&self.entries, SOURCE, "get.evict_expired").remove(key.as_str());
        Ok(None)
    }

    async fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), BackendError> {
        rw_write(&self.entries, SOURCE, "store").insert(key.as_str().to_owned(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), BackendError> {
        rw_write(&self.entries, SOURCE, "delete").remove(key.as_str());
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        rw_write(&self.entries, SOURCE, "clear").clear();
        Ok(())
    }

    async fn size_bytes(&self) -> Result<u64, BackendError> {
        let entries = rw_read(&self.entries, SOURCE, "size_bytes");
        Ok(entries.values().map(CacheEntry::size_bytes).sum())
    }
}
