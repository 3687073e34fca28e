//! L2 Cache - NVMe-tier Warm Cache
//!
//! Same sharded layout as L1 with a larger budget. Entries carry a TTL:
//! expired entries are dropped when read and by the periodic sweeper.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::pool::Pools;
use super::shard::{ShardedTier, TierStats};
use super::{CacheTier, DEFAULT_L2_CAPACITY};
use crate::error::Result;

/// L2 Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    /// Maximum capacity in bytes, split evenly across shards
    pub capacity_bytes: u64,
    /// Entry time-to-live in milliseconds (`None` = no expiry)
    pub ttl_ms: Option<u64>,
    /// Interval between expiry sweeps in milliseconds
    pub sweep_interval_ms: u64,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_L2_CAPACITY,
            ttl_ms: Some(24 * 60 * 60 * 1000), // 24h
            sweep_interval_ms: 60 * 1000,
        }
    }
}

impl L2Config {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// L2 Cache - warm tier with TTL expiry
pub struct L2Cache {
    storage: ShardedTier,
    config: L2Config,
}

impl L2Cache {
    pub fn new(config: L2Config, shard_count: usize, pools: Arc<Pools>) -> Result<Self> {
        Ok(Self {
            storage: ShardedTier::new(CacheTier::L2, config.capacity_bytes, shard_count, pools)?,
            config,
        })
    }

    /// TTL stamped on entries entering this tier
    pub fn ttl(&self) -> Option<Duration> {
        self.config.ttl()
    }

    /// Get a live entry; an expired one is removed and reported as a miss
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.storage.get(key)
    }

    pub fn insert(&self, entry: CacheEntry) -> Result<usize> {
        self.storage.insert(entry)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.storage.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.storage.contains(key)
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn drain_expired(&self) -> usize {
        self.storage.drain_expired()
    }

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

    pub fn evictions(&self) -> u64 {
        self.storage.evictions()
    }

    pub fn expirations(&self) -> u64 {
        self.storage.expirations()
    }

    pub fn clear(&self) {
        self.storage.clear()
    }

    pub fn storage(&self) -> &ShardedTier {
        &self.storage
    }

    pub fn config(&self) -> &L2Config {
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
    use std::collections::HashMap;

    fn make_entry(key: &str, size: usize, ttl: Option<Duration>) -> CacheEntry {
        let mut entry = CacheEntry::blank();
        entry.prepare(
            key,
            Payload::Raw(vec![2; size]),
            size as u64,
            CacheTier::L2,
            HashMap::new(),
            ttl,
        );
        entry
    }

    fn make_cache(ttl_ms: Option<u64>) -> L2Cache {
        L2Cache::new(
            L2Config {
                capacity_bytes: 1 << 20,
                ttl_ms,
                sweep_interval_ms: 10,
            },
            8,
            Arc::new(Pools::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_l2_config_defaults() {
        let config = L2Config::default();
        assert_eq!(config.ttl(), Some(Duration::from_secs(24 * 3600)));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_l2_cache_put_get() {
        let cache = make_cache(None);
        cache.insert(make_entry("k", 64, None)).unwrap();

        let entry = cache.get("k").unwrap();
        assert_eq!(entry.tier(), CacheTier::L2);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.size(), 64);
    }

    #[test]
    fn test_l2_expired_on_read() {
        let cache = make_cache(Some(20));
        cache
            .insert(make_entry("k", 64, cache.ttl()))
            .unwrap();

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("k").is_none());
        assert!(!cache.contains("k"));
        assert_eq!(cache.expirations(), 1);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_l2_drain_expired() {
        let cache = make_cache(Some(20));
        for i in 0..10 {
            cache
                .insert(make_entry(&format!("old-{}", i), 32, cache.ttl()))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(40));
        cache
            .insert(make_entry("fresh", 32, Some(Duration::from_secs(60))))
            .unwrap();

        assert_eq!(cache.drain_expired(), 10);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 32);
        assert!(cache.contains("fresh"));
    }

    #[test]
    fn test_l2_no_ttl_never_expires() {
        let cache = make_cache(None);
        cache.insert(make_entry("k", 8, cache.ttl())).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.drain_expired(), 0);
        assert!(cache.get("k").is_some());
    }
}
