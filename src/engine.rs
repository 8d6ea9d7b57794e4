//! Cache engine.
//!
//! Ties the gate, key derivation, capture protocol, minification and the
//! selected storage backend together behind one request-facing API. The
//! engine is constructed once per process (per tenant) with its settings and
//! backend injected; it holds no global state and never lets a backend
//! failure escape into the content response.

use std::sync::{Arc, RwLock};

use bytes::{Bytes, BytesMut};
use metrics::counter;
use tracing::{debug, warn};

use crate::backend::{self, CacheBackend};
use crate::capture::CaptureSession;
use crate::config::CacheSettings;
use crate::entry::CacheEntry;
use crate::gate::{RequestContext, RequestGate, SkipReason};
use crate::key;
use crate::lock::{rw_read, rw_write};
use crate::minify;
use crate::size::SizeCache;
use crate::telemetry::{METRIC_FLUSH, METRIC_HIT, METRIC_MISS, METRIC_REMOVE, METRIC_STORE};

const SOURCE: &str = "engine";

type PersistPredicate = Box<dyn Fn(&Bytes) -> bool + Send + Sync>;
type ContentTransform = Box<dyn Fn(Bytes) -> Bytes + Send + Sync>;

/// The caching decision-and-orchestration engine for one site.
pub struct CacheEngine {
    settings: RwLock<CacheSettings>,
    gate: RequestGate,
    backend: Arc<dyn CacheBackend>,
    variants: Vec<Arc<dyn CacheBackend>>,
    size: SizeCache,
    should_persist: Vec<PersistPredicate>,
    transforms: Vec<ContentTransform>,
    minify_ignore: Vec<String>,
}

impl CacheEngine {
    /// Build every configured storage variant, probe and select the active
    /// one, and assemble the engine. Never fails: an unavailable backend
    /// falls back to the in-process store.
    pub async fn start(settings: CacheSettings) -> Self {
        let variants = backend::build_variants(&settings);
        let active = backend::select_backend(&settings, &variants).await;
        Self::assemble(settings, active, variants)
    }

    /// Assemble an engine over explicit backends. Hosts use [`Self::start`];
    /// this seam exists for tests and embedders that manage storage
    /// themselves.
    pub fn assemble(
        settings: CacheSettings,
        backend: Arc<dyn CacheBackend>,
        variants: Vec<Arc<dyn CacheBackend>>,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            gate: RequestGate::new(),
            backend,
            variants,
            size: SizeCache::new(),
            should_persist: Vec::new(),
            transforms: Vec::new(),
            minify_ignore: minify::DEFAULT_IGNORE_TAGS
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
        }
    }

    // ========================================================================
    // Extension points (wired before the engine is shared)
    // ========================================================================

    /// Register an escape-hatch gate predicate; any returning true skips
    /// caching for that request.
    pub fn register_skip_override(
        &mut self,
        predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) {
        self.gate.register_override(predicate);
    }

    /// Replace the mobile-theme heuristic.
    pub fn set_mobile_predicate(
        &mut self,
        predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) {
        self.gate.set_mobile_predicate(predicate);
    }

    /// Register a veto over whether captured output is persisted.
    pub fn register_should_persist(
        &mut self,
        predicate: impl Fn(&Bytes) -> bool + Send + Sync + 'static,
    ) {
        self.should_persist.push(Box::new(predicate));
    }

    /// Register a content transform applied before minification and storage.
    pub fn register_transform(
        &mut self,
        transform: impl Fn(Bytes) -> Bytes + Send + Sync + 'static,
    ) {
        self.transforms.push(Box::new(transform));
    }

    /// Replace the set of tags minification leaves untouched.
    pub fn set_minify_ignore_tags(&mut self, tags: Vec<String>) {
        self.minify_ignore = tags;
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Current settings snapshot.
    pub fn settings(&self) -> CacheSettings {
        rw_read(&self.settings, SOURCE, "settings").clone()
    }

    /// Replace the settings wholesale, clearing every storage variant first
    /// so nothing stale survives the change. The active storage variant is
    /// selected once at startup; a changed `backend` kind takes effect on
    /// the next start, against storage this flush already emptied.
    pub async fn apply_settings(&self, new: CacheSettings) {
        self.flush_all_variants().await;
        *rw_write(&self.settings, SOURCE, "apply_settings") = new;
    }

    // ========================================================================
    // Request path
    // ========================================================================

    /// Evaluate the skip rules for one request.
    pub fn evaluate_request(&self, ctx: &RequestContext) -> Option<SkipReason> {
        let settings = rw_read(&self.settings, SOURCE, "evaluate_request");
        self.gate.evaluate(ctx, &settings)
    }

    pub fn should_skip(&self, ctx: &RequestContext) -> bool {
        self.evaluate_request(ctx).is_some()
    }

    /// Serve a stored page if one exists and is fresh. Backend failures are
    /// treated as a miss.
    pub async fn lookup(&self, is_secure: bool, raw_url: &str) -> Option<Bytes> {
        let key = key::compute(is_secure, raw_url)?;

        let entry = match self.backend.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                counter!(METRIC_MISS).increment(1);
                debug!(cache = "page", outcome = "miss", cache_key = %key, "no stored page");
                return None;
            }
            Err(err) => {
                counter!(METRIC_MISS).increment(1);
                warn!(
                    cache = "page",
                    backend = self.backend.label(),
                    error = %err,
                    "backend read failed; treating as miss"
                );
                return None;
            }
        };

        counter!(METRIC_HIT).increment(1);
        debug!(cache = "page", outcome = "hit", cache_key = %key, "serving stored page");

        if entry.signed {
            let signature = entry.signature(self.backend.label());
            let mut body = BytesMut::from(entry.body.as_ref());
            body.extend_from_slice(signature.as_bytes());
            Some(body.freeze())
        } else {
            Some(entry.body)
        }
    }

    /// Start buffering rendered output for this request. `None` when the URL
    /// yields no key, which sends the caller down the render-without-cache
    /// path.
    pub fn begin_capture(&self, is_secure: bool, raw_url: &str) -> Option<CaptureSession> {
        key::compute(is_secure, raw_url).map(CaptureSession::begin)
    }

    /// Terminal action for a normally completed response: run the persist
    /// vetoes, content transforms and minification, then store. At most one
    /// persisted write happens per request; an empty buffer or a veto means
    /// none.
    pub async fn commit(&self, session: CaptureSession) {
        let Some((key, body)) = session.take() else {
            return;
        };
        if body.is_empty() {
            debug!(cache_key = %key, "empty capture; nothing persisted");
            return;
        }
        if !self.should_persist.iter().all(|predicate| predicate(&body)) {
            debug!(cache_key = %key, "capture vetoed by should-persist hook");
            return;
        }

        let body = self
            .transforms
            .iter()
            .fold(body, |content, transform| transform(content));

        let (minify_mode, ttl, signed) = {
            let settings = rw_read(&self.settings, SOURCE, "commit");
            (settings.minify, settings.ttl(), settings.include_signature)
        };

        // Non-UTF-8 output is stored as captured; a borrowed result means
        // minification left the input untouched.
        let compacted = std::str::from_utf8(&body).ok().and_then(|html| {
            match minify::apply(html, minify_mode, &self.minify_ignore) {
                std::borrow::Cow::Owned(out) => Some(Bytes::from(out)),
                std::borrow::Cow::Borrowed(_) => None,
            }
        });
        let body = compacted.unwrap_or(body);

        let entry = CacheEntry::new(body, ttl, signed);
        match self.backend.store(&key, entry).await {
            Ok(()) => {
                counter!(METRIC_STORE).increment(1);
                debug!(cache = "page", cache_key = %key, "captured page stored");
            }
            Err(err) => {
                warn!(
                    cache = "page",
                    backend = self.backend.label(),
                    cache_key = %key,
                    error = %err,
                    "backend store failed; page not cached this time"
                );
            }
        }
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Remove the entry for one URL. Best-effort; failures are logged.
    pub async fn remove_url(&self, url: &str) {
        let is_secure = url.starts_with("https://");
        let Some(key) = key::compute(is_secure, url) else {
            warn!(url, "no cache key derivable; nothing removed");
            return;
        };
        match self.backend.delete(&key).await {
            Ok(()) => {
                counter!(METRIC_REMOVE).increment(1);
                debug!(cache = "page", cache_key = %key, url, "entry removed");
            }
            Err(err) => {
                warn!(
                    cache = "page",
                    backend = self.backend.label(),
                    error = %err,
                    "backend delete failed"
                );
            }
        }
    }

    /// Flush this site's entries from the active backend and drop the size
    /// memo.
    pub async fn flush_site(&self) {
        if let Err(err) = self.backend.clear().await {
            warn!(
                cache = "page",
                backend = self.backend.label(),
                error = %err,
                "backend clear failed"
            );
        }
        self.size.invalidate();
        counter!(METRIC_FLUSH).increment(1);
        debug!(cache = "page", backend = self.backend.label(), "site cache flushed");
    }

    /// Clear every constructed storage variant, selected or not, so entries
    /// cannot go stale in a variant that is later switched to. Best-effort
    /// per variant: one failure does not stop the rest.
    pub async fn flush_all_variants(&self) {
        for variant in &self.variants {
            if let Err(err) = variant.clear().await {
                warn!(
                    cache = "page",
                    backend = variant.label(),
                    error = %err,
                    "variant clear failed; continuing with remaining variants"
                );
            }
        }
        self.size.invalidate();
        counter!(METRIC_FLUSH).increment(1);
        debug!(cache = "page", "all storage variants flushed");
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Aggregate cached bytes in the active backend, memoized for fifteen
    /// minutes.
    pub async fn cache_size(&self) -> u64 {
        self.size.get(self.backend.as_ref()).await
    }

    /// The active storage backend.
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Every constructed storage variant.
    pub fn variants(&self) -> &[Arc<dyn CacheBackend>] {
        &self.variants
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::{DiskBackend, MemoryBackend};
    use crate::config::{BackendKind, MinifyMode};

    fn memory_engine(settings: CacheSettings) -> CacheEngine {
        let memory: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        CacheEngine::assemble(settings, Arc::clone(&memory), vec![memory])
    }

    async fn capture_and_commit(engine: &CacheEngine, url: &str, body: &[u8]) {
        let mut session = engine.begin_capture(false, url).expect("capture");
        session.write(body);
        engine.commit(session).await;
    }

    #[tokio::test]
    async fn commit_then_lookup_roundtrip() {
        let engine = memory_engine(CacheSettings::default());

        assert!(engine.lookup(false, "http://example.com/post-1").await.is_none());
        capture_and_commit(&engine, "http://example.com/post-1", b"<html>rendered</html>").await;

        let served = engine
            .lookup(false, "http://example.com/post-1")
            .await
            .expect("hit");
        assert_eq!(served.as_ref(), b"<html>rendered</html>");
    }

    #[tokio::test]
    async fn stored_entry_carries_configured_ttl() {
        let engine = memory_engine(CacheSettings {
            expires_hours: 12,
            ..Default::default()
        });
        capture_and_commit(&engine, "http://example.com/p", b"<html>x</html>").await;

        let key = key::compute(false, "http://example.com/p").expect("key");
        let entry = engine
            .backend()
            .get(&key)
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(entry.ttl, Duration::from_secs(12 * 3600));
    }

    #[tokio::test]
    async fn empty_capture_is_not_persisted() {
        let engine = memory_engine(CacheSettings::default());

        let session = engine
            .begin_capture(false, "http://example.com/empty")
            .expect("capture");
        engine.commit(session).await;

        assert!(engine.lookup(false, "http://example.com/empty").await.is_none());
        assert_eq!(engine.backend().size_bytes().await.expect("size"), 0);
    }

    #[tokio::test]
    async fn should_persist_hook_vetoes_storage() {
        let mut engine = memory_engine(CacheSettings::default());
        engine.register_should_persist(|body| !body.as_ref().starts_with(b"<!-- draft"));

        capture_and_commit(&engine, "http://example.com/draft", b"<!-- draft --><html></html>")
            .await;
        assert!(engine.lookup(false, "http://example.com/draft").await.is_none());

        capture_and_commit(&engine, "http://example.com/live", b"<html>live</html>").await;
        assert!(engine.lookup(false, "http://example.com/live").await.is_some());
    }

    #[tokio::test]
    async fn transform_hook_rewrites_content_before_storage() {
        let mut engine = memory_engine(CacheSettings::default());
        engine.register_transform(|body| {
            let mut out = BytesMut::from(body.as_ref());
            out.extend_from_slice(b"<!-- edge -->");
            out.freeze()
        });

        capture_and_commit(&engine, "http://example.com/p", b"<html>x</html>").await;

        let served = engine.lookup(false, "http://example.com/p").await.expect("hit");
        assert_eq!(served.as_ref(), b"<html>x</html><!-- edge -->");
    }

    #[tokio::test]
    async fn minification_applies_when_enabled() {
        let engine = memory_engine(CacheSettings {
            minify: MinifyMode::Html,
            ..Default::default()
        });

        capture_and_commit(
            &engine,
            "http://example.com/p",
            b"<p>hello   \n   world</p><!-- note -->",
        )
        .await;

        let served = engine.lookup(false, "http://example.com/p").await.expect("hit");
        assert_eq!(served.as_ref(), b"<p>hello world</p>");
    }

    #[tokio::test]
    async fn signature_appended_to_signed_entries() {
        let engine = memory_engine(CacheSettings {
            include_signature: true,
            ..Default::default()
        });

        capture_and_commit(&engine, "http://example.com/p", b"<html>page</html>").await;

        let served = engine.lookup(false, "http://example.com/p").await.expect("hit");
        let text = std::str::from_utf8(&served).expect("utf8");
        assert!(text.starts_with("<html>page</html>"));
        assert!(text.contains("<!-- scorta page cache |"));
        assert!(text.contains("via: memory"));
    }

    #[tokio::test]
    async fn flush_all_variants_empties_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let memory: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        let disk: Arc<dyn CacheBackend> = Arc::new(DiskBackend::new(dir.path().to_path_buf()));
        let engine = CacheEngine::assemble(
            CacheSettings::default(),
            Arc::clone(&memory),
            vec![Arc::clone(&memory), Arc::clone(&disk)],
        );

        let key = key::compute(false, "http://example.com/p").expect("key");
        let entry = CacheEntry::new(
            Bytes::from_static(b"<html>x</html>"),
            Duration::from_secs(3600),
            false,
        );
        memory.store(&key, entry.clone()).await.expect("store memory");
        disk.store(&key, entry).await.expect("store disk");

        engine.flush_all_variants().await;

        for variant in engine.variants() {
            assert_eq!(variant.size_bytes().await.expect("size"), 0);
        }
        assert_eq!(engine.cache_size().await, 0);
    }

    #[tokio::test]
    async fn apply_settings_replaces_snapshot_and_flushes() {
        let engine = memory_engine(CacheSettings::default());
        capture_and_commit(&engine, "http://example.com/p", b"<html>x</html>").await;

        engine
            .apply_settings(CacheSettings {
                expires_hours: 48,
                ..Default::default()
            })
            .await;

        assert_eq!(engine.settings().expires_hours, 48);
        assert!(engine.lookup(false, "http://example.com/p").await.is_none());
    }

    #[tokio::test]
    async fn unparseable_url_disables_capture() {
        let engine = memory_engine(CacheSettings::default());
        assert!(engine.begin_capture(false, "").is_none());
        assert!(engine.lookup(false, "").await.is_none());
    }

    #[tokio::test]
    async fn variants_report_their_kinds() {
        let engine = memory_engine(CacheSettings::default());
        assert_eq!(engine.backend().kind(), BackendKind::Memory);
        assert_eq!(engine.variants().len(), 1);
    }
}
