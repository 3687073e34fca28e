//! L3 - Cold Store Adapter
//!
//! The slowest tier is an external object store reached through the
//! [`ColdStore`] trait. [`ColdTier`] wraps an adapter with hit/miss/error
//! accounting: read failures and undecodable objects degrade to a miss, write
//! failures are surfaced.
//!
//! [`InMemoryColdStore`] is a reference adapter for tests and the demo binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use super::compression::{self, CompressionAlgorithm};
use crate::error::{Error, Result};

// =============================================================================
// Cold Object
// =============================================================================

/// Object as handed to / returned by a cold store
#[derive(Debug, Clone, PartialEq)]
pub struct ColdObject {
    /// Stored bytes (compressed when `algorithm` is not `None`)
    pub data: Bytes,
    pub algorithm: CompressionAlgorithm,
    /// Raw size in bytes
    pub size: u64,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// Adapters may drop the object after this point
    pub expires_at: Option<DateTime<Utc>>,
}

impl ColdObject {
    pub fn new(
        data: Bytes,
        algorithm: CompressionAlgorithm,
        size: u64,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            data,
            algorithm,
            size,
            metadata,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Uncompressed object
    pub fn raw(data: Bytes, metadata: HashMap<String, String>) -> Self {
        let size = data.len() as u64;
        Self::new(data, CompressionAlgorithm::None, size, metadata)
    }

    /// Set the expiry `ttl` from now
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| self.created_at + ttl);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Utc::now() > at)
    }

    /// Original raw bytes
    pub fn decode(&self) -> Result<Bytes> {
        match self.algorithm {
            CompressionAlgorithm::None => Ok(self.data.clone()),
            algorithm => compression::decompress(&self.data, algorithm).map(Bytes::from),
        }
    }
}

// =============================================================================
// Cold Store Trait
// =============================================================================

/// Narrow adapter over the backing object store
#[async_trait]
pub trait ColdStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when absent
    async fn get(&self, key: &str) -> Result<Option<ColdObject>>;

    /// Store an object, replacing any previous version
    async fn set(&self, key: &str, object: &ColdObject) -> Result<()>;

    /// Delete an object; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

// =============================================================================
// In-Memory Cold Store
// =============================================================================

/// Cold store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColdStoreStats {
    pub objects: u64,
    /// Stored (possibly compressed) bytes
    pub stored_bytes: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// DashMap-backed cold store with failure injection
#[derive(Default)]
pub struct InMemoryColdStore {
    objects: DashMap<String, ColdObject>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryColdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get` fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent `set` and `delete` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn stats(&self) -> ColdStoreStats {
        ColdStoreStats {
            objects: self.objects.len() as u64,
            stored_bytes: self
                .objects
                .iter()
                .map(|o| o.value().data.len() as u64)
                .sum(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ColdStore for InMemoryColdStore {
    async fn get(&self, key: &str) -> Result<Option<ColdObject>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::cold_store("get", key, "injected read failure"));
        }

        let object = self.objects.get(key).map(|o| o.value().clone());
        match object {
            Some(object) if object.is_expired() => {
                self.objects.remove(key);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn set(&self, key: &str, object: &ColdObject) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::cold_store("set", key, "injected write failure"));
        }
        self.objects.insert(key.to_string(), object.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::cold_store("delete", key, "injected delete failure"));
        }
        self.objects.remove(key);
        Ok(())
    }
}

// =============================================================================
// Cold Tier
// =============================================================================

/// L3 tier: a cold store adapter plus accounting
pub struct ColdTier {
    store: Arc<dyn ColdStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
}

impl ColdTier {
    pub fn new(store: Arc<dyn ColdStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }

    /// Fetch and decode from the cold store
    ///
    /// Adapter errors and objects that fail to decode count as a miss.
    pub async fn get(&self, key: &str) -> Option<(ColdObject, Bytes)> {
        match self.store.get(key).await {
            Ok(Some(object)) => match object.decode() {
                Ok(data) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some((object, data))
                }
                Err(e) => {
                    warn!(key, algorithm = %object.algorithm, error = %e, "Cold object failed to decode, treating as miss");
                    self.read_errors.fetch_add(1, Ordering::Relaxed);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Cold store read failed, treating as miss");
                self.read_errors.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, object: &ColdObject) -> Result<()> {
        self.store.set(key, object).await.map_err(|e| {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key).await.map_err(|e| {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_object(data: &'static [u8]) -> ColdObject {
        ColdObject::raw(Bytes::from_static(data), HashMap::new())
    }

    #[tokio::test]
    async fn test_in_memory_store_set_get() {
        let store = InMemoryColdStore::new();
        store.set("key", &make_object(b"data")).await.unwrap();

        let object = store.get("key").await.unwrap().unwrap();
        assert_eq!(object.data, Bytes::from_static(b"data"));
        assert_eq!(object.size, 4);
    }

    #[tokio::test]
    async fn test_in_memory_store_delete_absent_is_ok() {
        let store = InMemoryColdStore::new();
        store.delete("missing").await.unwrap();

        store.set("key", &make_object(b"data")).await.unwrap();
        store.delete("key").await.unwrap();
        assert!(store.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_store_stats() {
        let store = InMemoryColdStore::new();
        store.set("a", &make_object(b"data1")).await.unwrap();
        store.set("b", &make_object(b"data2")).await.unwrap();
        store.get("a").await.unwrap();
        store.delete("b").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.stored_bytes, 5);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.deletes, 1);
    }

    #[tokio::test]
    async fn test_in_memory_store_failure_injection() {
        let store = InMemoryColdStore::new();
        store.set_fail_writes(true);
        assert_matches!(
            store.set("k", &make_object(b"x")).await,
            Err(Error::ColdStore { operation: "set", .. })
        );

        store.set_fail_reads(true);
        assert_matches!(
            store.get("k").await,
            Err(Error::ColdStore { operation: "get", .. })
        );
    }

    #[tokio::test]
    async fn test_expired_object_is_absent() {
        let store = InMemoryColdStore::new();
        let object = make_object(b"old").with_ttl(Some(Duration::from_millis(1)));
        store.set("k", &object).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_compressed_object_decodes() {
        let raw = vec![b'q'; 10_000];
        let compressed = compression::compress_with(CompressionAlgorithm::Zstd, &raw, 3).unwrap();
        let object = ColdObject::new(
            Bytes::from(compressed),
            CompressionAlgorithm::Zstd,
            raw.len() as u64,
            HashMap::new(),
        );
        assert_eq!(object.decode().unwrap().as_ref(), raw.as_slice());
    }

    #[tokio::test]
    async fn test_cold_tier_read_error_is_miss() {
        let store = Arc::new(InMemoryColdStore::new());
        let tier = ColdTier::new(store.clone());

        store.set("k", &make_object(b"v")).await.unwrap();
        store.set_fail_reads(true);

        assert!(tier.get("k").await.is_none());
        assert_eq!(tier.read_errors(), 1);
        assert_eq!(tier.misses(), 1);
        assert_eq!(tier.hits(), 0);
    }

    #[tokio::test]
    async fn test_cold_tier_corrupt_object_is_miss() {
        let store = Arc::new(InMemoryColdStore::new());
        let tier = ColdTier::new(store.clone());

        let garbage = ColdObject::new(
            Bytes::from_static(b"definitely not a zstd frame"),
            CompressionAlgorithm::Zstd,
            1024,
            HashMap::new(),
        );
        store.set("k", &garbage).await.unwrap();

        assert!(tier.get("k").await.is_none());
        assert_eq!(tier.read_errors(), 1);
        assert_eq!(tier.misses(), 1);
        assert_eq!(tier.hits(), 0);
    }

    #[tokio::test]
    async fn test_cold_tier_get_decodes() {
        let raw = vec![b'z'; 8192];
        let compressed = compression::compress_with(CompressionAlgorithm::Zstd, &raw, 3).unwrap();
        let object = ColdObject::new(
            Bytes::from(compressed),
            CompressionAlgorithm::Zstd,
            raw.len() as u64,
            HashMap::new(),
        );
        let tier = ColdTier::new(Arc::new(InMemoryColdStore::new()));
        tier.put("k", &object).await.unwrap();

        let (fetched, data) = tier.get("k").await.unwrap();
        assert_eq!(fetched.algorithm, CompressionAlgorithm::Zstd);
        assert_eq!(data.as_ref(), raw.as_slice());
        assert_eq!(tier.hits(), 1);
    }

    #[tokio::test]
    async fn test_cold_tier_write_error_surfaced() {
        let store = Arc::new(InMemoryColdStore::new());
        let tier = ColdTier::new(store.clone());
        store.set_fail_writes(true);

        assert!(tier.put("k", &make_object(b"v")).await.is_err());
        assert!(tier.delete("k").await.is_err());
        assert_eq!(tier.write_errors(), 2);
    }

    #[tokio::test]
    async fn test_cold_tier_hit_tracking() {
        let tier = ColdTier::new(Arc::new(InMemoryColdStore::new()));
        tier.put("k", &make_object(b"v")).await.unwrap();

        tier.get("k").await;
        tier.get("k").await;
        tier.get("nope").await;

        assert_eq!(tier.hits(), 2);
        assert_eq!(tier.misses(), 1);
    }
}
