//! Relational table store.
//!
//! Pages live in a single Postgres table created on demand. Freshness is
//! filtered in SQL, so an expired row reads as a miss even before the lazy
//! delete catches up with it. Queries are bound at runtime; no live database
//! is needed to build the crate.

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;
use tracing::debug;

use crate::config::BackendKind;
use crate::entry::CacheEntry;
use crate::error::BackendError;
use crate::key::CacheKey;

use super::CacheBackend;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS scorta_page_cache (
    cache_key  TEXT PRIMARY KEY,
    body       BYTEA NOT NULL,
    stored_at  TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    signed     BOOLEAN NOT NULL
)";

pub struct DbBackend {
    pool: PgPool,
}

impl DbBackend {
    /// Construct over a lazily connecting pool; the first query establishes
    /// the connection, so construction itself cannot fail on an unreachable
    /// database.
    pub fn connect_lazy(url: &str) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_lazy(url)
            .map_err(BackendError::from)?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), BackendError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for DbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Db
    }

    async fn is_available(&self) -> bool {
        self.ensure_schema().await.is_ok()
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, BackendError> {
        let row = sqlx::query(
            "SELECT body, stored_at, expires_at, signed FROM scorta_page_cache \
             WHERE cache_key = $1 AND expires_at > now()",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            // Lazy eviction of whatever expired row might remain.
            let deleted = sqlx::query(
                "DELETE FROM scorta_page_cache WHERE cache_key = $1 AND expires_at <= now()",
            )
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
            if deleted.rows_affected() > 0 {
                debug!(cache_key = %key, "expired database entry evicted");
            }
            return Ok(None);
        };

        let body: Vec<u8> = row.try_get("body")?;
        let stored_at: OffsetDateTime = row.try_get("stored_at")?;
        let expires_at: OffsetDateTime = row.try_get("expires_at")?;
        let signed: bool = row.try_get("signed")?;

        Ok(Some(CacheEntry {
            body: Bytes::from(body),
            stored_at,
            ttl: (expires_at - stored_at).unsigned_abs(),
            signed,
        }))
    }

    async fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), BackendError> {
        let expires_at = entry.expires_at();
        sqlx::query(
            "INSERT INTO scorta_page_cache (cache_key, body, stored_at, expires_at, signed) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (cache_key) DO UPDATE SET \
                 body = EXCLUDED.body, \
                 stored_at = EXCLUDED.stored_at, \
                 expires_at = EXCLUDED.expires_at, \
                 signed = EXCLUDED.signed",
        )
        .bind(key.as_str())
        .bind(entry.body.as_ref())
        .bind(entry.stored_at)
        .bind(expires_at)
        .bind(entry.signed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM scorta_page_cache WHERE cache_key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM scorta_page_cache")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn size_bytes(&self) -> Result<u64, BackendError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(octet_length(body)), 0)::BIGINT AS total \
             FROM scorta_page_cache WHERE expires_at > now()",
        )
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }
}
