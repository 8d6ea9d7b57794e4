//! Cache key derivation.
//!
//! A key is a pure function of `(is_secure, host, path)`. The query string is
//! never part of it: two URLs differing only by query collide by design,
//! which keeps query-bearing traffic from fragmenting the cache (the gate
//! skips such requests outright under pretty permalinks).

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

/// Marker prefixed to the hashed material for TLS requests, so the secure and
/// insecure renditions of a page never share an entry.
const SECURE_MARKER: &str = "https-";

/// Suffix identifying entries as belonging to this cache.
const KEY_SUFFIX: &str = ".scorta";

/// Number of digest bytes kept (128 bits rendered as 32 hex chars).
const DIGEST_BYTES: usize = 16;

/// Opaque identity of one cached page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a request.
///
/// `raw_url` may be a full URL or a scheme-less `host/path` pair as it
/// arrives from the request line; the port and query are discarded either
/// way. Returns `None` when no host or path can be parsed, which sends the
/// caller down the render-without-cache path instead of failing the request.
pub fn compute(is_secure: bool, raw_url: &str) -> Option<CacheKey> {
    let (host, path) = split_host_path(raw_url)?;

    let marker = if is_secure { SECURE_MARKER } else { "" };
    let digest = Sha256::digest(format!("{marker}{host}{path}"));
    let rendered = hex::encode(&digest[..DIGEST_BYTES]);

    Some(CacheKey(format!("{rendered}{KEY_SUFFIX}")))
}

fn split_host_path(raw_url: &str) -> Option<(String, String)> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return None;
    }

    // `Url::parse` insists on a scheme; request-line style "host/path" input
    // gets a synthetic one. The scheme never reaches the hashed material,
    // only the secure marker does. Input that carries a scheme but still
    // fails to parse stays unparseable.
    let parsed = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("http://{trimmed}")).ok()?
    };

    // `host_str` excludes the port, so `example.com` and `example.com:8080`
    // share an entry.
    let host = parsed.host_str()?.to_owned();
    let path = parsed.path().to_owned();

    Some((host, path))
}
