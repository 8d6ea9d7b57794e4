//! Aggregate size memo.
//!
//! Backend size scans can be expensive (directory walks, table aggregates),
//! so the result is memoized for fifteen minutes. Every flush clears the
//! memo eagerly; a failed refresh reports zero without memoizing so the next
//! call probes again.

use std::sync::RwLock;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::warn;

use crate::backend::CacheBackend;
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "size";
const MEMO_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
struct SizeMemo {
    bytes: u64,
    refreshed_at: OffsetDateTime,
}

pub struct SizeCache {
    memo: RwLock<Option<SizeMemo>>,
}

impl SizeCache {
    pub fn new() -> Self {
        Self {
            memo: RwLock::new(None),
        }
    }

    /// Current aggregate size of `backend`, memoized.
    pub async fn get(&self, backend: &dyn CacheBackend) -> u64 {
        let now = OffsetDateTime::now_utc();
        if let Some(memo) = *rw_read(&self.memo, SOURCE, "get")
            && now < memo.refreshed_at + MEMO_TTL
        {
            return memo.bytes;
        }

        let bytes = match backend.size_bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    backend = backend.label(),
                    error = %err,
                    "cache size probe failed; reporting zero"
                );
                return 0;
            }
        };

        *rw_write(&self.memo, SOURCE, "get.refresh") = Some(SizeMemo {
            bytes,
            refreshed_at: now,
        });
        bytes
    }

    /// Drop the memo; the next [`SizeCache::get`] probes the backend again.
    pub fn invalidate(&self) {
        *rw_write(&self.memo, SOURCE, "invalidate") = None;
    }
}

impl Default for SizeCache {
    fn default() -> Self {
        Self::new()
    }
}
