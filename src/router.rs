//! Event-to-action routing.
//!
//! One explicit table maps every content-mutation event to a cache action:
//! a single-entry removal, a site flush, or nothing. Hosts extend the table
//! by registering extra rules instead of scattering callback registrations
//! around their codebase.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::engine::CacheEngine;
use crate::events::{EventKind, FlushScope};

/// Resolves a content id to its public URL. Implemented by the host's
/// permalink machinery.
pub trait PermalinkResolver: Send + Sync {
    fn permalink(&self, content_id: i64) -> Option<String>;
}

/// Enumerates every tenant's engine for all-sites flushes. Implemented by
/// the host's multi-tenant registry; single-tenant installs have none.
pub trait SiteDirectory: Send + Sync {
    fn sites(&self) -> Vec<Arc<CacheEngine>>;
}

/// What an event resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RemoveContent { content_id: i64 },
    FlushSite,
    FlushAllSites,
    None,
}

/// Additional `(event, settings) -> action` rules; the first rule returning
/// `Some` preempts the built-in table.
type Rule = Box<dyn Fn(&EventKind, &CacheSettings) -> Option<Action> + Send + Sync>;

/// Map an event to its cache action via the built-in table.
pub fn route(event: &EventKind, settings: &CacheSettings) -> Action {
    match event {
        EventKind::ContentPublished { public: false, .. } => Action::None,
        EventKind::ContentPublished { content_id, public: true } => {
            if settings.flush_on_publish {
                Action::FlushSite
            } else {
                Action::RemoveContent {
                    content_id: *content_id,
                }
            }
        }
        EventKind::Comment { content_id, .. } => {
            if settings.flush_on_comment {
                Action::FlushSite
            } else {
                Action::RemoveContent {
                    content_id: *content_id,
                }
            }
        }
        EventKind::ContentDeleted { .. }
        | EventKind::TermChanged
        | EventKind::UserChanged
        | EventKind::ThemeSwitched
        | EventKind::CoreUpdated => Action::FlushSite,
        // Revision snapshots never touch the cache.
        EventKind::RevisionSaved { .. } => Action::None,
        EventKind::FlushRequested { scope } => match scope {
            FlushScope::Site => Action::FlushSite,
            FlushScope::AllSites => Action::FlushAllSites,
        },
    }
}

/// Routes mutation events to invalidation actions against one engine (and,
/// for all-sites scopes, every tenant the directory knows).
pub struct InvalidationRouter {
    engine: Arc<CacheEngine>,
    resolver: Arc<dyn PermalinkResolver>,
    sites: Option<Arc<dyn SiteDirectory>>,
    rules: Vec<Rule>,
}

impl InvalidationRouter {
    pub fn new(engine: Arc<CacheEngine>, resolver: Arc<dyn PermalinkResolver>) -> Self {
        Self {
            engine,
            resolver,
            sites: None,
            rules: Vec::new(),
        }
    }

    /// Attach the multi-tenant directory used by all-sites flushes.
    pub fn with_site_directory(mut self, sites: Arc<dyn SiteDirectory>) -> Self {
        self.sites = Some(sites);
        self
    }

    /// Register an additional routing rule, consulted before the built-in
    /// table.
    pub fn register_rule(
        &mut self,
        rule: impl Fn(&EventKind, &CacheSettings) -> Option<Action> + Send + Sync + 'static,
    ) {
        self.rules.push(Box::new(rule));
    }

    /// Route and execute one event.
    pub async fn dispatch(&self, event: EventKind) {
        let settings = self.engine.settings();
        let action = self
            .rules
            .iter()
            .find_map(|rule| rule(&event, &settings))
            .unwrap_or_else(|| route(&event, &settings));

        debug!(event = ?event, action = ?action, "invalidation event routed");

        match action {
            Action::None => {}
            Action::RemoveContent { content_id } => {
                let Some(url) = self.resolver.permalink(content_id) else {
                    warn!(content_id, "no permalink resolved; nothing removed");
                    return;
                };
                self.engine.remove_url(&url).await;
            }
            Action::FlushSite => self.engine.flush_site().await,
            Action::FlushAllSites => self.flush_all_sites().await,
        }
    }

    /// Flush every tenant the directory enumerates; without a directory the
    /// scope degrades to the local site.
    async fn flush_all_sites(&self) {
        let Some(directory) = self.sites.as_ref() else {
            self.engine.flush_site().await;
            return;
        };
        for site in directory.sites() {
            site.flush_site().await;
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }
}
