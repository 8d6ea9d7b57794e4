//! Cached page entries.

use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One stored page.
///
/// Owned by the storage backend; the engine never retains a copy beyond the
/// current request.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Rendered page bytes as captured (and possibly minified).
    pub body: Bytes,
    /// When the entry was persisted.
    pub stored_at: OffsetDateTime,
    /// Lifetime after which the entry reads as a miss.
    pub ttl: Duration,
    /// Whether a signature comment is appended when the entry is served.
    pub signed: bool,
}

impl CacheEntry {
    pub fn new(body: Bytes, ttl: Duration, signed: bool) -> Self {
        Self {
            body,
            stored_at: OffsetDateTime::now_utc(),
            ttl,
            signed,
        }
    }

    /// A hit is only valid while `now < stored_at + ttl`.
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at()
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.stored_at + self.ttl
    }

    /// Approximate storage footprint in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.body.len() as u64
    }

    /// Signature comment appended to signed entries at serve time.
    pub fn signature(&self, backend_label: &str) -> String {
        let stored = self
            .stored_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.stored_at.unix_timestamp().to_string());
        format!("\n<!-- scorta page cache | stored: {stored} | via: {backend_label} -->")
    }
}
