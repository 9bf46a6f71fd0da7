//! Read-cache decorator.
//!
//! Wraps any [`KeyValueStore`] and keeps the latest bytes of recently read
//! or written keys in memory. Coherency rules:
//!
//! - `get` serves from the cache and populates it on a miss.
//! - `set`/`set_with_timestamp` delegate; a returned version overwrites
//!   the cached entry, a no-op write leaves it untouched.
//! - `delete` evicts. A cache hit makes `exists` true without I/O.
//! - Version, history, metadata, listing and fsck calls pass straight
//!   through and never touch the cache.
//!
//! The cache is not coherent across store instances or external mutation
//! of the root directory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use kozane_core::{KeyValueStore, Meta, Result, VersionRecord};

/// Caching wrapper around a store.
pub struct CachedStore<S> {
    inner: S,
    cache: Mutex<HashMap<String, Bytes>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl<S> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.cache.lock().len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries,
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for CachedStore<S> {
    async fn get(&self, key: &str) -> Result<Bytes> {
        if let Some(value) = self.cache.lock().get(key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = self.inner.get(key).await?;
        self.cache.lock().insert(key.to_string(), value.clone());
        Ok(value)
    }

    async fn get_by_version(&self, key: &str, version: &str) -> Result<Bytes> {
        self.inner.get_by_version(key, version).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<Option<String>> {
        let version = self.inner.set(key, value).await?;
        if version.is_some() {
            self.cache
                .lock()
                .insert(key.to_string(), Bytes::copy_from_slice(value));
        }
        Ok(version)
    }

    async fn set_with_timestamp(
        &self,
        key: &str,
        value: &[u8],
        timestamp_ns: i64,
    ) -> Result<Option<String>> {
        let version = self.inner.set_with_timestamp(key, value, timestamp_ns).await?;
        if version.is_some() {
            self.cache
                .lock()
                .insert(key.to_string(), Bytes::copy_from_slice(value));
        }
        Ok(version)
    }

    async fn set_meta(&self, key: &str, version: &str, meta: &Meta) -> Result<()> {
        self.inner.set_meta(key, version, meta).await
    }

    async fn update_meta(&self, key: &str, version: &str, meta: &Meta) -> Result<()> {
        self.inner.update_meta(key, version, meta).await
    }

    async fn delete(&self, key: &str, remove_histories: bool) -> Result<()> {
        self.inner.delete(key, remove_histories).await?;
        self.cache.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.cache.lock().contains_key(key) {
            return Ok(true);
        }
        self.inner.exists(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_keys(prefix).await
    }

    async fn get_histories(&self, key: &str) -> Result<Vec<VersionRecord>> {
        self.inner.get_histories(key).await
    }

    async fn get_last_version(&self, key: &str) -> Result<VersionRecord> {
        self.inner.get_last_version(key).await
    }

    async fn get_prev_version(&self, key: &str, revision: &str) -> Result<VersionRecord> {
        self.inner.get_prev_version(key, revision).await
    }

    async fn get_next_version(&self, key: &str, revision: &str) -> Result<VersionRecord> {
        self.inner.get_next_version(key, revision).await
    }

    async fn cleanup_histories_by_time(&self, key: &str, max_age: Duration) -> Result<()> {
        self.inner.cleanup_histories_by_time(key, max_age).await
    }

    async fn cleanup_histories_by_count(&self, key: &str, max_count: usize) -> Result<()> {
        self.inner.cleanup_histories_by_count(key, max_count).await
    }

    async fn fsck(&self) -> Result<()> {
        self.inner.fsck().await
    }
}
