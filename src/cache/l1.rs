//! L1 Cache - RAM-based Hot Cache
//!
//! Lowest-latency tier. Objects here never expire; they leave only through
//! replacement, invalidation or LRU eviction.
//!
//! # Design
//!
//! - ShardedTier with `shard_count` shards, one RwLock each
//! - Per-shard byte budget of `capacity / shard_count`
//! - Exact LRU eviction inside the owning shard

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::pool::Pools;
use super::shard::{ShardedTier, TierStats};
use super::{CacheTier, DEFAULT_L1_CAPACITY};
use crate::error::Result;

/// L1 Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct L1Config {
    /// Maximum capacity in bytes, split evenly across shards
    pub capacity_bytes: u64,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_L1_CAPACITY,
        }
    }
}

/// L1 Cache - RAM-based hot cache
pub struct L1Cache {
    storage: ShardedTier,
    config: L1Config,
}

impl L1Cache {
    pub fn new(config: L1Config, shard_count: usize, pools: Arc<Pools>) -> Result<Self> {
        Ok(Self {
            storage: ShardedTier::new(CacheTier::L1, config.capacity_bytes, shard_count, pools)?,
            config,
        })
    }

    /// Get an entry, recording the access on a hit
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.storage.get(key)
    }

    /// Put an entry, returning how many entries were evicted for it
    pub fn insert(&self, entry: CacheEntry) -> Result<usize> {
        self.storage.insert(entry)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.storage.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.storage.contains(key)
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.storage.used_bytes()
    }

    pub fn capacity(&self) -> u64 {
        self.config.capacity_bytes
    }

    pub fn shard_budget(&self) -> u64 {
        self.storage.shard_budget()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.storage.hits()
    }

    pub fn misses(&self) -> u64 {
        self.storage.misses()
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn evictions(&self) -> u64 {
        self.storage.evictions()
    }

    pub fn clear(&self) {
        self.storage.clear()
    }

    /// Sharded storage backing this tier
    pub fn storage(&self) -> &ShardedTier {
        &self.storage
    }

    pub fn config(&self) -> &L1Config {
        &self.config
    }

    pub fn stats(&self) -> TierStats {
        self.storage.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Payload;

    fn make_entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::new(key, Payload::Raw(vec![1; size]), size as u64, CacheTier::L1)
    }

    fn make_cache(capacity: u64, shards: usize) -> L1Cache {
        L1Cache::new(
            L1Config {
                capacity_bytes: capacity,
            },
            shards,
            Arc::new(Pools::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_l1_cache_creation() {
        let cache = make_cache(1 << 20, 16);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 1 << 20);
        assert_eq!(cache.shard_budget(), (1 << 20) / 16);
    }

    #[test]
    fn test_l1_cache_put_get() {
        let cache = make_cache(1 << 20, 16);
        cache.insert(make_entry("object.txt", 13)).unwrap();

        let entry = cache.get("object.txt").unwrap();
        assert_eq!(entry.size(), 13);
        assert_eq!(entry.access_count(), 1);
        assert_eq!(cache.size(), 13);
    }

    #[test]
    fn test_l1_cache_miss() {
        let cache = make_cache(1 << 20, 16);
        assert!(cache.get("nonexistent").is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn test_l1_cache_remove() {
        let cache = make_cache(1 << 20, 16);
        cache.insert(make_entry("k", 100)).unwrap();

        assert!(cache.remove("k"));
        assert!(!cache.contains("k"));
        assert!(!cache.remove("k"));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_l1_cache_eviction() {
        // Single shard so every key competes for the same budget
        let cache = make_cache(1000, 1);
        for i in 0..20 {
            cache.insert(make_entry(&format!("key-{}", i), 100)).unwrap();
        }

        assert!(cache.size() <= 1000);
        assert_eq!(cache.evictions(), 10);
        assert!(!cache.contains("key-0"));
        assert!(cache.contains("key-19"));
    }

    #[test]
    fn test_l1_cache_hit_ratio() {
        let cache = make_cache(1 << 20, 4);
        cache.insert(make_entry("k", 10)).unwrap();
        cache.get("k");
        cache.get("k");
        cache.get("k");
        cache.get("missing");

        assert_eq!(cache.hit_ratio(), 0.75);
    }

    #[test]
    fn test_l1_cache_stats() {
        let cache = make_cache(4096, 4);
        cache.insert(make_entry("a", 100)).unwrap();
        cache.insert(make_entry("b", 200)).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.used_bytes, 300);
        assert_eq!(stats.capacity_bytes, 4096);
        assert_eq!(stats.shard_count, 4);
        assert_eq!(stats.shard_budget, 1024);
    }
}
