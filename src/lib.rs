//! Scorta Page Cache
//!
//! A full-page output cache engine for content publishing platforms. Rendered
//! HTML is captured once, stored in a pluggable backend, and served to
//! anonymous visitors without re-running the rendering pipeline. Content
//! mutations are routed through an explicit event table to either a
//! single-entry removal or a site-wide flush.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `scorta.toml` (overridable through
//! `SCORTA__*` environment variables):
//!
//! ```toml
//! only_guests = true
//! minify = "disabled"
//! expires_hours = 12
//! backend = "memory"
//! flush_on_publish = true
//! # ... see config.rs for all options
//! ```
//!
//! ## Embedding
//!
//! The host mounts [`middleware::page_cache_layer`] in front of its public
//! routes and feeds content lifecycle events into an [`InvalidationRouter`].
//! Everything else (storage selection, capture, minification, expiry) happens
//! inside the engine.

pub mod backend;
mod capture;
mod config;
mod engine;
mod entry;
mod error;
mod events;
mod gate;
pub mod key;
mod lock;
pub mod middleware;
mod minify;
mod router;
mod size;
mod telemetry;

pub use capture::CaptureSession;
pub use config::{
    BackendKind, CacheSettings, CacheSettingsForm, DatabaseSettings, DiskSettings, MinifyMode,
    RemoteSettings,
};
pub use engine::CacheEngine;
pub use entry::CacheEntry;
pub use error::{BackendError, SettingsError};
pub use events::{CommentTransition, EventKind, FlushScope};
pub use gate::{EntryPoint, PageClass, RequestContext, RequestGate, SkipReason};
pub use key::CacheKey;
pub use middleware::{PageCacheState, PlatformFacts};
pub use minify::DEFAULT_IGNORE_TAGS;
pub use router::{Action, InvalidationRouter, PermalinkResolver, SiteDirectory};
pub use telemetry::describe_metrics;
