//! Cache configuration.
//!
//! An immutable settings snapshot loaded once per process from `scorta.toml`
//! (with `SCORTA__*` environment overrides) or handed over by the host, plus
//! the normalization rules for the persisted settings form.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::SettingsError;

const LOCAL_CONFIG_BASENAME: &str = "scorta";
const ENV_PREFIX: &str = "SCORTA";

// Default values for cache configuration
const DEFAULT_EXPIRES_HOURS: u32 = 12;
const DEFAULT_DISK_DIRECTORY: &str = "cache/scorta";
const MIN_EXPIRES_HOURS: u32 = 1;

/// How aggressively captured HTML is compacted before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinifyMode {
    /// Store the captured output byte-identical.
    Disabled,
    /// Strip comments and collapse whitespace, leaving inline scripts alone.
    Html,
    /// Additionally compact inline script content.
    HtmlJs,
}

/// The storage variant entries are persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Relational table store.
    Db,
    /// In-process memory store. Always available; the fallback variant.
    Memory,
    /// Filesystem store under a configured directory.
    Disk,
    /// Distributed HTTP key-value store.
    Remote,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Db => "database",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Remote => "remote",
        }
    }
}

/// Filesystem store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiskSettings {
    /// Directory cached pages are written to.
    pub directory: PathBuf,
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DISK_DIRECTORY),
        }
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connection URL; the db variant is only constructed when set.
    pub url: Option<String>,
}

/// Distributed store settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Base URL of the key-value service; the remote variant is only
    /// constructed when set.
    pub endpoint: Option<String>,
}

/// Cache settings snapshot.
///
/// Created at load and replaced wholesale on save; never partially mutated.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Serve cached pages to anonymous visitors only.
    pub only_guests: bool,
    /// HTML compaction applied before storage.
    pub minify: MinifyMode,
    /// Entry lifetime in hours, clamped to at least one.
    pub expires_hours: u32,
    /// Content ids excluded from caching.
    pub excluded_ids: BTreeSet<i64>,
    /// User-agent substrings excluded from caching.
    pub excluded_agents: Vec<String>,
    /// Storage variant requested at startup.
    pub backend: BackendKind,
    /// Flush the whole site on publish instead of removing one entry.
    pub flush_on_publish: bool,
    /// Flush the whole site on comment activity instead of removing one entry.
    pub flush_on_comment: bool,
    /// Mark stored entries so a signature comment is appended when serving.
    pub include_signature: bool,
    /// Token holders may invoke the flush command. `None` disables it.
    pub management_token: Option<String>,
    pub disk: DiskSettings,
    pub database: DatabaseSettings,
    pub remote: RemoteSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            only_guests: true,
            minify: MinifyMode::Disabled,
            expires_hours: DEFAULT_EXPIRES_HOURS,
            excluded_ids: BTreeSet::new(),
            excluded_agents: Vec::new(),
            backend: BackendKind::Memory,
            flush_on_publish: true,
            flush_on_comment: false,
            include_signature: false,
            management_token: None,
            disk: DiskSettings::default(),
            database: DatabaseSettings::default(),
            remote: RemoteSettings::default(),
        }
    }
}

impl CacheSettings {
    /// Load settings from `scorta.toml` (if present) layered under
    /// `SCORTA__*` environment overrides.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_layered(None)
    }

    /// Load settings from an explicit file layered under environment
    /// overrides.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        Self::load_layered(Some(path))
    }

    fn load_layered(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false)),
        };
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Entry lifetime, clamped to at least one hour.
    pub fn ttl(&self) -> Duration {
        let hours = u64::from(self.expires_hours.max(MIN_EXPIRES_HOURS));
        Duration::from_secs(hours * 3600)
    }
}

// ============================================================================
// Settings form normalization
// ============================================================================

/// Raw values as they arrive from the persisted settings form.
///
/// Everything is a string at this point; [`CacheSettingsForm::normalize`]
/// coerces booleans from 0/1, clamps the hour count and splits CSV lists,
/// falling back to the current snapshot for absent fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettingsForm {
    pub only_guests: Option<String>,
    pub minify: Option<String>,
    pub expires_hours: Option<String>,
    pub excluded_ids: Option<String>,
    pub excluded_agents: Option<String>,
    pub backend: Option<String>,
    pub flush_on_publish: Option<String>,
    pub flush_on_comment: Option<String>,
    pub include_signature: Option<String>,
}

impl CacheSettingsForm {
    /// Coerce the raw form into a full settings snapshot, using `current`
    /// for any field the form did not carry.
    pub fn normalize(&self, current: &CacheSettings) -> CacheSettings {
        CacheSettings {
            only_guests: coerce_flag(self.only_guests.as_deref(), current.only_guests),
            minify: coerce_minify(self.minify.as_deref(), current.minify),
            expires_hours: coerce_hours(self.expires_hours.as_deref(), current.expires_hours),
            excluded_ids: self
                .excluded_ids
                .as_deref()
                .map(parse_id_csv)
                .unwrap_or_else(|| current.excluded_ids.clone()),
            excluded_agents: self
                .excluded_agents
                .as_deref()
                .map(split_csv)
                .unwrap_or_else(|| current.excluded_agents.clone()),
            backend: coerce_backend(self.backend.as_deref(), current.backend),
            flush_on_publish: coerce_flag(self.flush_on_publish.as_deref(), current.flush_on_publish),
            flush_on_comment: coerce_flag(self.flush_on_comment.as_deref(), current.flush_on_comment),
            include_signature: coerce_flag(
                self.include_signature.as_deref(),
                current.include_signature,
            ),
            management_token: current.management_token.clone(),
            disk: current.disk.clone(),
            database: current.database.clone(),
            remote: current.remote.clone(),
        }
    }
}

/// Split a comma-separated list, trimming and dropping empty segments.
pub fn split_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_id_csv(input: &str) -> BTreeSet<i64> {
    split_csv(input)
        .iter()
        .filter_map(|segment| segment.parse().ok())
        .collect()
}

fn coerce_flag(raw: Option<&str>, fallback: bool) -> bool {
    match raw.map(str::trim) {
        Some("1") | Some("true") | Some("on") => true,
        Some(_) => false,
        None => fallback,
    }
}

fn coerce_hours(raw: Option<&str>, fallback: u32) -> u32 {
    match raw.and_then(|value| value.trim().parse::<u32>().ok()) {
        Some(hours) => hours.max(MIN_EXPIRES_HOURS),
        None => fallback.max(MIN_EXPIRES_HOURS),
    }
}

fn coerce_minify(raw: Option<&str>, fallback: MinifyMode) -> MinifyMode {
    match raw.map(str::trim) {
        Some("0") | Some("disabled") => MinifyMode::Disabled,
        Some("1") | Some("html") => MinifyMode::Html,
        Some("2") | Some("html_js") => MinifyMode::HtmlJs,
        _ => fallback,
    }
}

fn coerce_backend(raw: Option<&str>, fallback: BackendKind) -> BackendKind {
    match raw.map(str::trim) {
        Some("db") => BackendKind::Db,
        Some("memory") => BackendKind::Memory,
        Some("disk") => BackendKind::Disk,
        Some("remote") => BackendKind::Remote,
        _ => fallback,
    }
}
