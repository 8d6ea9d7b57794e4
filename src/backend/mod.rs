//! Storage backends.
//!
//! Four interchangeable variants persist cached pages: a relational table, an
//! in-process memory map, a filesystem directory and a distributed HTTP
//! key-value service. The engine talks to whichever one the capability probe
//! selected at startup and treats every backend failure as a miss or no-op,
//! never as a request failure.

mod db;
mod disk;
mod memory;
mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

pub use db::DbBackend;
pub use disk::DiskBackend;
pub use memory::MemoryBackend;
pub use remote::RemoteBackend;

use crate::config::{BackendKind, CacheSettings};
use crate::entry::CacheEntry;
use crate::error::BackendError;
use crate::key::CacheKey;

/// Capability interface every storage variant satisfies.
///
/// Contracts: `get` is a miss for absent *and* expired entries; `store` is an
/// upsert with last-write-wins semantics under concurrency; `delete` and
/// `clear` are idempotent; `size_bytes` may be approximate for distributed
/// variants.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Display name for diagnostics.
    fn label(&self) -> &'static str {
        self.kind().label()
    }

    /// Environment probe, evaluated once at startup to select the active
    /// variant.
    async fn is_available(&self) -> bool;

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, BackendError>;

    async fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), BackendError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), BackendError>;

    async fn clear(&self) -> Result<(), BackendError>;

    async fn size_bytes(&self) -> Result<u64, BackendError>;
}

/// Construct every variant the settings make constructible.
///
/// The memory variant always exists; db and remote require their connection
/// settings. The full list is what a total flush clears, so entries left in
/// a deselected variant cannot go stale unnoticed.
pub fn build_variants(settings: &CacheSettings) -> Vec<Arc<dyn CacheBackend>> {
    let mut variants: Vec<Arc<dyn CacheBackend>> = Vec::with_capacity(4);

    if let Some(url) = settings.database.url.as_deref() {
        match DbBackend::connect_lazy(url) {
            Ok(backend) => variants.push(Arc::new(backend)),
            Err(err) => warn!(error = %err, "database cache variant not constructed"),
        }
    }
    variants.push(Arc::new(MemoryBackend::new()));
    variants.push(Arc::new(DiskBackend::new(settings.disk.directory.clone())));
    if let Some(endpoint) = settings.remote.endpoint.as_deref() {
        variants.push(Arc::new(RemoteBackend::new(endpoint)));
    }

    variants
}

/// Pick the active variant: the configured kind when its probe passes, else
/// the always-available in-process store. Startup never fails over a missing
/// backend.
pub async fn select_backend(
    settings: &CacheSettings,
    variants: &[Arc<dyn CacheBackend>],
) -> Arc<dyn CacheBackend> {
    for variant in variants {
        if variant.kind() == settings.backend && variant.is_available().await {
            info!(backend = variant.label(), "cache backend selected");
            return Arc::clone(variant);
        }
    }

    let fallback = variants
        .iter()
        .find(|variant| variant.kind() == BackendKind::Memory)
        .map(Arc::clone)
        .unwrap_or_else(|| Arc::new(MemoryBackend::new()));

    if settings.backend != BackendKind::Memory {
        warn!(
            requested = settings.backend.label(),
            "requested cache backend unavailable; falling back to memory"
        );
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_variant_is_always_constructed() {
        let variants = build_variants(&CacheSettings::default());
        assert!(
            variants
                .iter()
                .any(|variant| variant.kind() == BackendKind::Memory)
        );
    }

    #[tokio::test]
    async fn unavailable_request_falls_back_to_memory() {
        let settings = CacheSettings {
            backend: BackendKind::Remote,
            ..Default::default()
        };
        // No remote endpoint configured, so the variant does not even exist.
        let variants = build_variants(&settings);
        let selected = select_backend(&settings, &variants).await;
        assert_eq!(selected.kind(), BackendKind::Memory);
    }

    #[tokio::test]
    async fn configured_memory_backend_is_selected() {
        let settings = CacheSettings::default();
        let variants = build_variants(&settings);
        let selected = select_backend(&settings, &variants).await;
        assert_eq!(selected.kind(), BackendKind::Memory);
        assert_eq!(selected.label(), "memory");
    }
}
