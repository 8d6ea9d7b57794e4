//! Page cache middleware and the administrative flush command.
//!
//! The middleware sits in front of the host's public routes: it gates the
//! request, serves a stored page on a hit and captures the rendered output
//! on a miss. Platform-known facts (entry point, authentication, semantic
//! page class) arrive via a [`PlatformFacts`] request extension; everything
//! else is read off the request itself.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

use crate::engine::CacheEngine;
use crate::events::{EventKind, FlushScope};
use crate::gate::{EntryPoint, PageClass, RequestContext};
use crate::router::InvalidationRouter;

/// Facts only the host platform knows about a request, injected as a request
/// extension by an earlier layer. Absent facts default to an ordinary
/// anonymous front-controller page view.
#[derive(Debug, Clone)]
pub struct PlatformFacts {
    pub entry_point: EntryPoint,
    pub authenticated: bool,
    pub pretty_permalinks: bool,
    pub page_classes: Vec<PageClass>,
    pub do_not_cache: bool,
    pub theme: String,
    pub content_id: Option<i64>,
}

impl Default for PlatformFacts {
    fn default() -> Self {
        Self {
            entry_point: EntryPoint::FrontController,
            authenticated: false,
            pretty_permalinks: true,
            page_classes: Vec::new(),
            do_not_cache: false,
            theme: String::new(),
            content_id: None,
        }
    }
}

/// Shared state for the middleware and the flush command.
#[derive(Clone)]
pub struct PageCacheState {
    pub engine: Arc<CacheEngine>,
    pub router: Arc<InvalidationRouter>,
}

/// Middleware for full-page caching of public routes.
///
/// Hit: the stored page is served without running the handler. Miss: the
/// handler runs, a 200 HTML response is captured and committed, everything
/// else leaves the capture to be discarded on drop.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<PageCacheState>,
    request: Request,
    next: Next,
) -> Response {
    let facts = request
        .extensions()
        .get::<PlatformFacts>()
        .cloned()
        .unwrap_or_default();
    let ctx = build_context(&request, &facts);

    if let Some(reason) = state.engine.evaluate_request(&ctx) {
        debug!(cache = "page", outcome = "skip", reason = ?reason, "request not cacheable");
        return next.run(request).await;
    }

    let secure = request_is_secure(&request);
    let Some(raw_url) = request_url(&request) else {
        return next.run(request).await;
    };

    if let Some(body) = state.engine.lookup(secure, &raw_url).await {
        return serve_stored(body);
    }

    let Some(mut session) = state.engine.begin_capture(secure, &raw_url) else {
        return next.run(request).await;
    };

    let response = next.run(request).await;

    if response.status() != StatusCode::OK || !is_html(response.headers()) {
        session.discard();
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            // The body stream failed mid-flight; there is nothing left to
            // serve, cached or not.
            warn!(error = %err, "response body collection failed");
            session.discard();
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    session.write(&bytes);
    state.engine.commit(session).await;

    Response::from_parts(parts, Body::from(bytes))
}

/// Query parameters of the flush command.
#[derive(Debug, Default, Deserialize)]
pub struct FlushParams {
    /// `all` reaches every tenant; anything else stays on this site.
    pub scope: Option<String>,
}

/// The administrative flush command.
///
/// Requires the configured management token as a bearer credential, compared
/// in constant time. Unauthorized callers get an explicit rejection, never a
/// silent no-op.
pub async fn flush_handler(
    State(state): State<PageCacheState>,
    Query(params): Query<FlushParams>,
    headers: HeaderMap,
) -> Response {
    let Some(expected) = state.engine.settings().management_token else {
        return reject(
            StatusCode::FORBIDDEN,
            "flush command disabled: no management token configured",
        );
    };
    let Some(provided) = bearer_token(&headers) else {
        return reject(StatusCode::UNAUTHORIZED, "missing management token");
    };
    if expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() != 1 {
        return reject(StatusCode::UNAUTHORIZED, "invalid management token");
    }

    let scope = match params.scope.as_deref() {
        Some("all") => FlushScope::AllSites,
        _ => FlushScope::Site,
    };
    state
        .router
        .dispatch(EventKind::FlushRequested { scope })
        .await;

    let scope_label = match scope {
        FlushScope::Site => "site",
        FlushScope::AllSites => "all",
    };
    (
        StatusCode::OK,
        Json(json!({ "flushed": true, "scope": scope_label })),
    )
        .into_response()
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "flushed": false, "error": message }))).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn build_context(request: &Request, facts: &PlatformFacts) -> RequestContext {
    RequestContext {
        method: request.method().clone(),
        has_query: request
            .uri()
            .query()
            .is_some_and(|query| !query.is_empty()),
        pretty_permalinks: facts.pretty_permalinks,
        entry_point: facts.entry_point,
        authenticated: facts.authenticated,
        cookie_names: cookie_names(request.headers()),
        page_classes: facts.page_classes.clone(),
        do_not_cache: facts.do_not_cache,
        theme: facts.theme.clone(),
        content_id: facts.content_id,
        user_agent: request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned),
    }
}

fn cookie_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.split('=').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

fn request_is_secure(request: &Request) -> bool {
    if request.uri().scheme_str() == Some("https") {
        return true;
    }
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Host and path as hashed into the key; the query string plays no part.
fn request_url(request: &Request) -> Option<String> {
    let host = request
        .uri()
        .host()
        .map(str::to_owned)
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        })?;
    Some(format!("{host}{}", request.uri().path()))
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with("text/html"))
}

fn serve_stored(body: bytes::Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}
