//! Distributed key-value store.
//!
//! Talks to an HTTP key-value service (a memcached-class tier behind an HTTP
//! facade) with a JSON envelope per entry. The service owns server-side
//! eviction via the transmitted ttl; freshness is still re-checked client
//! side so a lagging tier never serves a stale hit. Sizes are whatever the
//! service reports and may be approximate.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::BackendKind;
use crate::entry::CacheEntry;
use crate::error::BackendError;
use crate::key::CacheKey;

use super::CacheBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire shape of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct RemoteEntry {
    body_b64: String,
    stored_at_unix: i64,
    ttl_seconds: u64,
    signed: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteStats {
    bytes: u64,
}

pub struct RemoteBackend {
    client: Client,
    base: String,
}

impl RemoteBackend {
    pub fn new(endpoint: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: endpoint.trim_end_matches('/').to_owned(),
        }
    }

    fn entry_url(&self, key: &CacheKey) -> String {
        format!("{}/entries/{}", self.base, key.as_str())
    }
}

#[async_trait]
impl CacheBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base);
        matches!(
            self.client.get(url).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, BackendError> {
        let response = self.client.get(self.entry_url(key)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BackendError::remote(format!(
                "get returned {}",
                response.status()
            )));
        }

        let wire: RemoteEntry = response.json().await?;
        let body = BASE64
            .decode(&wire.body_b64)
            .map_err(|err| BackendError::remote(format!("body decoding failed: {err}")))?;
        let stored_at = OffsetDateTime::from_unix_timestamp(wire.stored_at_unix)
            .map_err(|err| BackendError::remote(format!("bad stored_at: {err}")))?;

        let entry = CacheEntry {
            body: Bytes::from(body),
            stored_at,
            ttl: Duration::from_secs(wire.ttl_seconds),
            signed: wire.signed,
        };
        if !entry.is_fresh(OffsetDateTime::now_utc()) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), BackendError> {
        let wire = RemoteEntry {
            body_b64: BASE64.encode(&entry.body),
            stored_at_unix: entry.stored_at.unix_timestamp(),
            ttl_seconds: entry.ttl.as_secs(),
            signed: entry.signed,
        };
        let response = self
            .client
            .put(self.entry_url(key))
            .json(&wire)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::remote(format!(
                "store returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), BackendError> {
        let response = self.client.delete(self.entry_url(key)).send().await?;
        // Deleting an absent key is not an error.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(BackendError::remote(format!(
                "delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        let url = format!("{}/entries", self.base);
        let response = self.client.delete(url).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::remote(format!(
                "clear returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn size_bytes(&self) -> Result<u64, BackendError> {
        let url = format!("{}/stats", self.base);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::remote(format!(
                "stats returned {}",
                response.status()
            )));
        }
        let stats: RemoteStats = response.json().await?;
        Ok(stats.bytes)
    }
}
