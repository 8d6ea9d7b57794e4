//! Output capture protocol.
//!
//! A two-phase buffer between "the renderer produced bytes" and "the backend
//! persisted an entry". A session is created on a cache miss, collects the
//! rendered output, and is then consumed by exactly one terminal action:
//! [`CacheEngine::commit`](crate::CacheEngine::commit) on normal completion,
//! or [`CaptureSession::discard`] (explicitly, or implicitly on drop) when
//! the generation path aborts. Both terminal actions take the session by
//! value, so a double commit cannot be written.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::key::CacheKey;

/// Request-local buffer of rendered output destined for the cache.
pub struct CaptureSession {
    parts: Option<(CacheKey, BytesMut)>,
}

impl CaptureSession {
    /// Start buffering output for `key`.
    pub fn begin(key: CacheKey) -> Self {
        Self {
            parts: Some((key, BytesMut::new())),
        }
    }

    /// Append a chunk of rendered output.
    pub fn write(&mut self, chunk: &[u8]) {
        if let Some((_, buf)) = self.parts.as_mut() {
            buf.extend_from_slice(chunk);
        }
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.parts.as_ref().map(|(key, _)| key)
    }

    pub fn is_empty(&self) -> bool {
        self.parts
            .as_ref()
            .is_none_or(|(_, buf)| buf.is_empty())
    }

    /// Drop the buffered output without persisting anything.
    pub fn discard(mut self) {
        if let Some((key, buf)) = self.parts.take() {
            debug!(
                cache_key = %key,
                buffered = buf.len(),
                "capture discarded without persisting"
            );
        }
    }

    /// Detach the key and buffered bytes for the commit path.
    pub(crate) fn take(mut self) -> Option<(CacheKey, Bytes)> {
        self.parts.take().map(|(key, buf)| (key, buf.freeze()))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // An abnormal exit from the generation path lands here: the buffer
        // dies with the request, never the backend.
        if let Some((key, buf)) = self.parts.take() {
            debug!(
                cache_key = %key,
                buffered = buf.len(),
                "capture dropped before commit; buffered output discarded"
            );
        }
    }
}
