//! Filesystem store.
//!
//! Each entry is a body file plus a JSON meta sidecar under the configured
//! directory. Writes go to a uniquely named temp file first and are then
//! renamed into place, so a concurrent reader sees either the previous entry
//! or the complete new one, never a partial write. The meta file is published
//! last and read first, which makes it the commit point.
//!
//! Expired entries are dropped lazily on read; [`DiskBackend::sweep_expired`]
//! exists for a host-scheduled maintenance timer and is safe to interleave
//! with request traffic.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BackendKind;
use crate::entry::CacheEntry;
use crate::error::BackendError;
use crate::key::CacheKey;

use super::CacheBackend;

const META_SUFFIX: &str = ".meta";

#[derive(Debug, Serialize, Deserialize)]
struct DiskMeta {
    stored_at_unix: i64,
    ttl_seconds: u64,
    signed: bool,
}

pub struct DiskBackend {
    directory: PathBuf,
}

impl DiskBackend {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn body_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(key.as_str())
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(format!("{key}{META_SUFFIX}"))
    }

    /// Write `contents` under `final_path` via a unique temp file + rename.
    async fn publish(&self, final_path: &PathBuf, contents: &[u8]) -> Result<(), BackendError> {
        let tmp_path = self.directory.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, contents).await?;
        if let Err(err) = tokio::fs::rename(&tmp_path, final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn remove_pair(&self, key: &CacheKey) {
        for path in [self.meta_path(key), self.body_path(key)] {
            if let Err(err) = tokio::fs::remove_file(&path).await
                && err.kind() != ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %err, "failed to remove cache file");
            }
        }
    }

    /// Remove every entry whose ttl has elapsed. Runs from an external timer.
    pub async fn sweep_expired(&self) -> Result<usize, BackendError> {
        let now = OffsetDateTime::now_utc();
        let mut removed = 0;

        let mut dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(dirent) = dir.next_entry().await? {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(META_SUFFIX) else {
                continue;
            };

            let Ok(raw) = tokio::fs::read(dirent.path()).await else {
                continue;
            };
            let fresh = serde_json::from_slice::<DiskMeta>(&raw)
                .ok()
                .and_then(|meta| decode_entry(meta, Bytes::new()))
                .is_some_and(|entry| entry.is_fresh(now));
            if !fresh {
                let _ = tokio::fs::remove_file(dirent.path()).await;
                let _ = tokio::fs::remove_file(self.directory.join(stem)).await;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "disk cache sweep removed expired entries");
        }
        Ok(removed)
    }
}

fn decode_entry(meta: DiskMeta, body: Bytes) -> Option<CacheEntry> {
    let stored_at = OffsetDateTime::from_unix_timestamp(meta.stored_at_unix).ok()?;
    Some(CacheEntry {
        body,
        stored_at,
        ttl: Duration::from_secs(meta.ttl_seconds),
        signed: meta.signed,
    })
}

#[async_trait]
impl CacheBackend for DiskBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Disk
    }

    async fn is_available(&self) -> bool {
        tokio::fs::create_dir_all(&self.directory).await.is_ok()
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, BackendError> {
        let raw_meta = match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let Ok(meta) = serde_json::from_slice::<DiskMeta>(&raw_meta) else {
            // Unreadable sidecar: drop the pair and report a miss.
            self.remove_pair(key).await;
            return Ok(None);
        };

        let body = match tokio::fs::read(self.body_path(key)).await {
            Ok(body) => Bytes::from(body),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match decode_entry(meta, body) {
            Some(entry) if entry.is_fresh(OffsetDateTime::now_utc()) => Ok(Some(entry)),
            _ => {
                self.remove_pair(key).await;
                Ok(None)
            }
        }
    }

    async fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), BackendError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let meta = DiskMeta {
            stored_at_unix: entry.stored_at.unix_timestamp(),
            ttl_seconds: entry.ttl.as_secs(),
            signed: entry.signed,
        };
        let raw_meta = serde_json::to_vec(&meta)
            .map_err(|err| BackendError::database(format!("meta encoding failed: {err}")))?;

        // Body first, meta last: the sidecar is the commit point for readers.
        self.publish(&self.body_path(key), &entry.body).await?;
        self.publish(&self.meta_path(key), &raw_meta).await?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), BackendError> {
        self.remove_pair(key).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        let mut dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        while let Some(dirent) = dir.next_entry().await? {
            if let Err(err) = tokio::fs::remove_file(dirent.path()).await
                && err.kind() != ErrorKind::NotFound
            {
                warn!(path = %dirent.path().display(), error = %err, "failed to clear cache file");
            }
        }
        Ok(())
    }

    async fn size_bytes(&self) -> Result<u64, BackendError> {
        let mut total = 0;
        let mut dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(dirent) = dir.next_entry().await? {
            if let Ok(metadata) = dirent.metadata().await
                && metadata.is_file()
            {
                total += metadata.len();
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    fn sample_key(path: &str) -> CacheKey {
        key::compute(false, &format!("http://example.com{path}")).expect("key")
    }

    fn backend() -> (tempfile::TempDir, DiskBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskBackend::new(dir.path().to_path_buf());
        (dir, backend)
    }

    #[tokio::test]
    async fn store_then_get_roundtrip() {
        let (_dir, backend) = backend();
        let key = sample_key("/post-1");

        let entry = CacheEntry::new(
            Bytes::from_static(b"<html>disk</html>"),
            Duration::from_secs(3600),
            true,
        );
        backend.store(&key, entry).await.expect("store");

        let cached = backend.get(&key).await.expect("get").expect("entry");
        assert_eq!(cached.body.as_ref(), b"<html>disk</html>");
        assert!(cached.signed);
    }

    #[tokio::test]
    async fn absent_key_is_a_miss() {
        let (_dir, backend) = backend();
        assert!(
            backend
                .get(&sample_key("/nothing"))
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn expired_entry_is_dropped_on_read() {
        let (_dir, backend) = backend();
        let key = sample_key("/stale");

        let mut entry = CacheEntry::new(Bytes::from_static(b"old"), Duration::from_secs(60), false);
        entry.stored_at = OffsetDateTime::now_utc() - Duration::from_secs(3600);
        backend.store(&key, entry).await.expect("store");

        assert!(backend.get(&key).await.expect("get").is_none());
        // Both files are gone after the lazy eviction.
        assert_eq!(backend.size_bytes().await.expect("size"), 0);
    }

    #[tokio::test]
    async fn clear_empties_the_directory() {
        let (_dir, backend) = backend();
        for path in ["/a", "/b"] {
            backend
                .store(
                    &sample_key(path),
                    CacheEntry::new(Bytes::from_static(b"body"), Duration::from_secs(60), false),
                )
                .await
                .expect("store");
        }
        assert!(backend.size_bytes().await.expect("size") > 0);

        backend.clear().await.expect("clear");
        assert_eq!(backend.size_bytes().await.expect("size"), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let (_dir, backend) = backend();

        let fresh_key = sample_key("/fresh");
        backend
            .store(
                &fresh_key,
                CacheEntry::new(Bytes::from_static(b"new"), Duration::from_secs(3600), false),
            )
            .await
            .expect("store fresh");

        let stale_key = sample_key("/stale");
        let mut stale =
            CacheEntry::new(Bytes::from_static(b"old"), Duration::from_secs(60), false);
        stale.stored_at = OffsetDateTime::now_utc() - Duration::from_secs(3600);
        backend.store(&stale_key, stale).await.expect("store stale");

        let removed = backend.sweep_expired().await.expect("sweep");
        assert_eq!(removed, 1);
        assert!(backend.get(&fresh_key).await.expect("get").is_some());
        assert!(backend.get(&stale_key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, backend) = backend();
        let key = sample_key("/gone");

        backend.delete(&key).await.expect("delete absent");
        backend
            .store(
                &key,
                CacheEntry::new(Bytes::from_static(b"x"), Duration::from_secs(60), false),
            )
            .await
            .expect("store");
        backend.delete(&key).await.expect("delete");
        backend.delete(&key).await.expect("delete again");
        assert!(backend.get(&key).await.expect("get").is_none());
    }
}
