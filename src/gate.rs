//! Request eligibility.
//!
//! One pure decision over the request and the settings snapshot: should this
//! response bypass the cache entirely? Rules are evaluated in a fixed order
//! and the first match wins, so the cheapest structural checks run before
//! anything touching headers or content identity.

use axum::http::Method;

use crate::config::CacheSettings;

/// Cookie name prefixes that mark a visitor as recognized (logged in,
/// password-bearing, previewing or a returning commenter).
const RECOGNIZED_COOKIE_PREFIXES: [&str; 4] =
    ["session_", "postpass_", "comment_author_", "preview_"];

/// Default substrings the mobile-theme heuristic looks for in the active
/// theme name. Defaults only; hosts replace the whole predicate via
/// [`RequestGate::set_mobile_predicate`].
const MOBILE_THEME_MARKERS: [&str; 3] = ["touch", "mobile", "handheld"];

/// Where the request entered the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// The single front controller ordinary page views route through.
    FrontController,
    Admin,
    Api,
    Cron,
    Cli,
}

/// Semantic classes of pages that are never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    Search,
    NotFound,
    Feed,
    Trackback,
    Robots,
    Preview,
    PasswordProtected,
    Sitemap,
}

/// Everything the gate needs to know about one request.
///
/// Built by the middleware from the request itself plus the host-supplied
/// platform facts; tests construct it directly.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub has_query: bool,
    pub pretty_permalinks: bool,
    pub entry_point: EntryPoint,
    pub authenticated: bool,
    pub cookie_names: Vec<String>,
    pub page_classes: Vec<PageClass>,
    pub do_not_cache: bool,
    pub theme: String,
    pub content_id: Option<i64>,
    pub user_agent: Option<String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            method: Method::GET,
            has_query: false,
            pretty_permalinks: true,
            entry_point: EntryPoint::FrontController,
            authenticated: false,
            cookie_names: Vec::new(),
            page_classes: Vec::new(),
            do_not_cache: false,
            theme: String::new(),
            content_id: None,
            user_agent: None,
        }
    }
}

/// Why a request was excluded from caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonReadMethod,
    QueryWithPrettyPermalinks,
    NotFrontController,
    RecognizedVisitor,
    OverridePredicate,
    NonCacheablePage,
    DoNotCacheFlag,
    MobileTheme,
    ExcludedContent,
    ExcludedUserAgent,
    SitemapResource,
}

type Predicate = Box<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Decides, per request, whether caching applies at all.
pub struct RequestGate {
    overrides: Vec<Predicate>,
    mobile: Predicate,
}

impl RequestGate {
    pub fn new() -> Self {
        Self {
            overrides: Vec::new(),
            mobile: Box::new(default_mobile_predicate),
        }
    }

    /// Register an escape-hatch predicate; any returning true skips caching.
    pub fn register_override(&mut self, predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static) {
        self.overrides.push(Box::new(predicate));
    }

    /// Replace the mobile-theme heuristic wholesale.
    pub fn set_mobile_predicate(&mut self, predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static) {
        self.mobile = Box::new(predicate);
    }

    /// Evaluate the skip rules in order; `None` means the request is
    /// eligible for caching. Pure: no side effects on the request or the
    /// settings.
    pub fn evaluate(&self, ctx: &RequestContext, settings: &CacheSettings) -> Option<SkipReason> {
        if ctx.method != Method::GET {
            return Some(SkipReason::NonReadMethod);
        }
        if ctx.has_query && ctx.pretty_permalinks {
            return Some(SkipReason::QueryWithPrettyPermalinks);
        }
        if ctx.entry_point != EntryPoint::FrontController {
            return Some(SkipReason::NotFrontController);
        }
        if settings.only_guests && is_recognized_visitor(ctx) {
            return Some(SkipReason::RecognizedVisitor);
        }
        if self.overrides.iter().any(|predicate| predicate(ctx)) {
            return Some(SkipReason::OverridePredicate);
        }
        if ctx
            .page_classes
            .iter()
            .any(|class| *class != PageClass::Sitemap)
        {
            return Some(SkipReason::NonCacheablePage);
        }
        if ctx.do_not_cache {
            return Some(SkipReason::DoNotCacheFlag);
        }
        if (self.mobile)(ctx) {
            return Some(SkipReason::MobileTheme);
        }
        if let Some(id) = ctx.content_id
            && settings.excluded_ids.contains(&id)
        {
            return Some(SkipReason::ExcludedContent);
        }
        if let Some(agent) = ctx.user_agent.as_deref()
            && settings
                .excluded_agents
                .iter()
                .any(|needle| agent.contains(needle))
        {
            return Some(SkipReason::ExcludedUserAgent);
        }
        if ctx.page_classes.contains(&PageClass::Sitemap) {
            return Some(SkipReason::SitemapResource);
        }
        None
    }

    pub fn should_skip(&self, ctx: &RequestContext, settings: &CacheSettings) -> bool {
        self.evaluate(ctx, settings).is_some()
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new()
    }
}

fn is_recognized_visitor(ctx: &RequestContext) -> bool {
    if ctx.authenticated {
        return true;
    }
    ctx.cookie_names.iter().any(|name| {
        RECOGNIZED_COOKIE_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
    })
}

fn default_mobile_predicate(ctx: &RequestContext) -> bool {
    let theme = ctx.theme.to_ascii_lowercase();
    MOBILE_THEME_MARKERS
        .iter()
        .any(|marker| theme.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CacheSettings {
        CacheSettings::default()
    }

    #[test]
    fn eligible_request_passes() {
        let gate = RequestGate::new();
        assert_eq!(gate.evaluate(&RequestContext::default(), &settings()), None);
    }

    #[test]
    fn non_get_always_skips() {
        let gate = RequestGate::new();
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
            let ctx = RequestContext {
                method,
                ..Default::default()
            };
            assert_eq!(
                gate.evaluate(&ctx, &settings()),
                Some(SkipReason::NonReadMethod)
            );
        }
    }

    #[test]
    fn query_with_pretty_permalinks_skips() {
        let gate = RequestGate::new();
        let ctx = RequestContext {
            has_query: true,
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &settings()),
            Some(SkipReason::QueryWithPrettyPermalinks)
        );

        // Without pretty permalinks a query string is the address itself.
        let ctx = RequestContext {
            has_query: true,
            pretty_permalinks: false,
            ..Default::default()
        };
        assert_eq!(gate.evaluate(&ctx, &settings()), None);
    }

    #[test]
    fn non_front_controller_skips() {
        let gate = RequestGate::new();
        for entry_point in [
            EntryPoint::Admin,
            EntryPoint::Api,
            EntryPoint::Cron,
            EntryPoint::Cli,
        ] {
            let ctx = RequestContext {
                entry_point,
                ..Default::default()
            };
            assert_eq!(
                gate.evaluate(&ctx, &settings()),
                Some(SkipReason::NotFrontController)
            );
        }
    }

    #[test]
    fn authenticated_visitor_skips_when_guests_only() {
        let gate = RequestGate::new();
        let ctx = RequestContext {
            authenticated: true,
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &settings()),
            Some(SkipReason::RecognizedVisitor)
        );

        let open = CacheSettings {
            only_guests: false,
            ..Default::default()
        };
        assert_eq!(gate.evaluate(&ctx, &open), None);
    }

    #[test]
    fn recognized_cookie_skips() {
        let gate = RequestGate::new();
        let ctx = RequestContext {
            cookie_names: vec!["theme".to_string(), "comment_author_abc".to_string()],
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &settings()),
            Some(SkipReason::RecognizedVisitor)
        );

        let ctx = RequestContext {
            cookie_names: vec!["theme".to_string()],
            ..Default::default()
        };
        assert_eq!(gate.evaluate(&ctx, &settings()), None);
    }

    #[test]
    fn override_predicate_skips() {
        let mut gate = RequestGate::new();
        gate.register_override(|ctx| ctx.theme == "holdout");

        let ctx = RequestContext {
            theme: "holdout".to_string(),
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &settings()),
            Some(SkipReason::OverridePredicate)
        );
    }

    #[test]
    fn non_cacheable_page_classes_skip() {
        let gate = RequestGate::new();
        for class in [
            PageClass::Search,
            PageClass::NotFound,
            PageClass::Feed,
            PageClass::Trackback,
            PageClass::Robots,
            PageClass::Preview,
            PageClass::PasswordProtected,
        ] {
            let ctx = RequestContext {
                page_classes: vec![class],
                ..Default::default()
            };
            assert_eq!(
                gate.evaluate(&ctx, &settings()),
                Some(SkipReason::NonCacheablePage)
            );
        }
    }

    #[test]
    fn sitemap_reports_its_own_reason() {
        let gate = RequestGate::new();
        let ctx = RequestContext {
            page_classes: vec![PageClass::Sitemap],
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &settings()),
            Some(SkipReason::SitemapResource)
        );
    }

    #[test]
    fn do_not_cache_flag_skips() {
        let gate = RequestGate::new();
        let ctx = RequestContext {
            do_not_cache: true,
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &settings()),
            Some(SkipReason::DoNotCacheFlag)
        );
    }

    #[test]
    fn mobile_theme_heuristic_is_replaceable() {
        let gate = RequestGate::new();
        let ctx = RequestContext {
            theme: "WPtouch-classic".to_string(),
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &settings()),
            Some(SkipReason::MobileTheme)
        );

        let mut lenient = RequestGate::new();
        lenient.set_mobile_predicate(|_| false);
        assert_eq!(lenient.evaluate(&ctx, &settings()), None);
    }

    #[test]
    fn excluded_content_id_skips() {
        let gate = RequestGate::new();
        let mut config = settings();
        config.excluded_ids.insert(7);

        let ctx = RequestContext {
            content_id: Some(7),
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &config),
            Some(SkipReason::ExcludedContent)
        );

        let ctx = RequestContext {
            content_id: Some(8),
            ..Default::default()
        };
        assert_eq!(gate.evaluate(&ctx, &config), None);
    }

    #[test]
    fn excluded_user_agent_substring_skips() {
        let gate = RequestGate::new();
        let config = CacheSettings {
            excluded_agents: vec!["Crawler".to_string()],
            ..Default::default()
        };

        let ctx = RequestContext {
            user_agent: Some("Mozilla/5.0 ExampleCrawler/1.0".to_string()),
            ..Default::default()
        };
        assert_eq!(
            gate.evaluate(&ctx, &config),
            Some(SkipReason::ExcludedUserAgent)
        );
    }
}
