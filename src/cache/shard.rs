//! Sharded Tier Implementation
//!
//! A tier is split into `shard_count` independently locked shards. Keys are
//! routed with 64-bit FNV-1a, and each shard enforces an equal slice of the
//! tier's byte budget with LRU eviction.
//!
//! # Design
//!
//! - Each shard has its own RwLock, minimizing contention
//! - Hits take the read lock and update atomics only
//! - Inserts, removals and evictions take the write lock
//! - Cache-line padding between shards prevents false sharing

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use super::entry::{CacheEntry, CacheTier};
use super::lru::LruTracker;
use super::pool::Pools;
use crate::error::{Error, Result};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// =============================================================================
// Shard
// =============================================================================

struct ShardState {
    entries: HashMap<String, Arc<CacheEntry>>,
    used_bytes: u64,
    lru: LruTracker,
}

/// Result of a successful insert
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Entries evicted to make room, oldest first
    pub evicted: Vec<Arc<CacheEntry>>,
    /// Previous entry stored under the same key
    pub replaced: Option<Arc<CacheEntry>>,
}

/// Result of a read lookup
pub(crate) enum Lookup {
    Hit(Arc<CacheEntry>),
    Expired,
    Miss,
}

/// Single shard: key map, running byte total and recency index
#[repr(C, align(64))]
pub struct Shard {
    state: RwLock<ShardState>,
    tier: CacheTier,
    budget: u64,
}

impl Shard {
    pub fn new(tier: CacheTier, budget: u64) -> Self {
        Self {
            state: RwLock::new(ShardState {
                entries: HashMap::new(),
                used_bytes: 0,
                lru: LruTracker::new(),
            }),
            tier,
            budget,
        }
    }

    /// Byte budget of this shard
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Bytes currently charged to this shard (raw object sizes)
    pub fn used_bytes(&self) -> u64 {
        self.state.read().used_bytes
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`, recording the access on a live hit
    pub(crate) fn lookup(&self, key: &str, now: Instant) -> Lookup {
        let guard = self.state.read();
        match guard.entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => Lookup::Expired,
            Some(entry) => {
                entry.record_access();
                Lookup::Hit(Arc::clone(entry))
            }
            None => Lookup::Miss,
        }
    }

    /// Get an entry without touching its access bookkeeping
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.state.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.read().entries.contains_key(key)
    }

    /// Insert `entry`, replacing any entry under the same key and evicting
    /// least recently used entries until it fits
    ///
    /// An entry larger than the whole shard budget is rejected without
    /// touching the shard.
    pub fn insert(&self, entry: CacheEntry) -> Result<InsertOutcome> {
        let size = entry.size();
        if size > self.budget {
            return Err(Error::CapacityExceeded {
                tier: self.tier,
                key: entry.key().to_string(),
                size,
                budget: self.budget,
            });
        }

        let mut guard = self.state.write();
        let ShardState {
            entries,
            used_bytes,
            lru,
        } = &mut *guard;

        let mut outcome = InsertOutcome::default();
        if let Some(old) = entries.remove(entry.key()) {
            *used_bytes -= old.size();
            lru.remove(old.key());
            outcome.replaced = Some(old);
        }

        while *used_bytes + size > self.budget {
            let Some(victim) = lru.pop_lru(|k| entries.get(k).map(|e| e.last_accessed())) else {
                break;
            };
            if let Some(old) = entries.remove(&victim) {
                *used_bytes -= old.size();
                outcome.evicted.push(old);
            }
        }

        if *used_bytes + size > self.budget {
            // Only reachable if the tracker lost a key
            return Err(Error::Internal(format!(
                "{} shard could not make room for '{}' ({} bytes)",
                self.tier,
                entry.key(),
                size
            )));
        }

        let entry = Arc::new(entry);
        lru.track(entry.key(), entry.last_accessed());
        *used_bytes += size;
        entries.insert(entry.key().to_string(), entry);

        Ok(outcome)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut guard = self.state.write();
        let removed = guard.entries.remove(key)?;
        guard.used_bytes -= removed.size();
        guard.lru.remove(key);
        Some(removed)
    }

    /// Remove `key` only if it is still expired as of `now`
    pub(crate) fn remove_if_expired(&self, key: &str, now: Instant) -> Option<Arc<CacheEntry>> {
        let mut guard = self.state.write();
        if !guard.entries.get(key)?.is_expired_at(now) {
            return None;
        }
        let removed = guard.entries.remove(key)?;
        guard.used_bytes -= removed.size();
        guard.lru.remove(key);
        Some(removed)
    }

    /// Remove every entry whose TTL has run out
    pub fn drain_expired(&self, now: Instant) -> Vec<Arc<CacheEntry>> {
        let mut guard = self.state.write();
        let ShardState {
            entries,
            used_bytes,
            lru,
        } = &mut *guard;

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(entry) = entries.remove(&key) {
                *used_bytes -= entry.size();
                lru.remove(&key);
                removed.push(entry);
            }
        }
        removed
    }

    /// Remove everything
    pub fn clear(&self) -> Vec<Arc<CacheEntry>> {
        let mut guard = self.state.write();
        guard.used_bytes = 0;
        guard.lru.clear();
        guard.entries.drain().map(|(_, e)| e).collect()
    }
}

// =============================================================================
// Sharded Tier
// =============================================================================

/// Tier occupancy and counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: u64,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub shard_count: usize,
    pub shard_budget: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// A byte-budgeted tier split across independently locked shards
pub struct ShardedTier {
    tier: CacheTier,
    shards: Box<[Shard]>,
    capacity: u64,
    shard_budget: u64,
    pools: Arc<Pools>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ShardedTier {
    pub fn new(
        tier: CacheTier,
        capacity: u64,
        shard_count: usize,
        pools: Arc<Pools>,
    ) -> Result<Self> {
        if shard_count == 0 {
            return Err(Error::Config(format!("{} shard count must be > 0", tier)));
        }
        let shard_budget = capacity / shard_count as u64;
        if shard_budget == 0 {
            return Err(Error::Config(format!(
                "{} capacity {} is too small for {} shards",
                tier, capacity, shard_count
            )));
        }

        let shards: Vec<Shard> = (0..shard_count)
            .map(|_| Shard::new(tier, shard_budget))
            .collect();

        Ok(Self {
            tier,
            shards: shards.into_boxed_slice(),
            capacity,
            shard_budget,
            pools,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn shard_budget(&self) -> u64 {
        self.shard_budget
    }

    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        (fnv1a_64(key.as_bytes()) % self.shards.len() as u64) as usize
    }

    /// Shard that owns `key`
    #[inline]
    pub fn shard_for(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Look up `key`, recording a hit or miss
    ///
    /// Expired entries count as a miss and are removed on the spot.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let shard = self.shard_for(key);
        let now = Instant::now();
        match shard.lookup(key, now) {
            Lookup::Hit(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Lookup::Expired => {
                if let Some(entry) = shard.remove_if_expired(key, now) {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                    self.pools.release_entry(entry);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Lookup::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get without bookkeeping
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.shard_for(key).peek(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shard_for(key).contains(key)
    }

    /// Insert into the owning shard, returning the number of evictions
    ///
    /// Evicted and replaced entries go back to the pools.
    pub fn insert(&self, entry: CacheEntry) -> Result<usize> {
        let outcome = self.shard_for(entry.key()).insert(entry)?;

        let evicted = outcome.evicted.len();
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        for victim in outcome.evicted {
            debug!(
                tier = %self.tier,
                key = victim.key(),
                size = victim.size(),
                "Evicted least recently used entry"
            );
            self.pools.release_entry(victim);
        }
        if let Some(old) = outcome.replaced {
            self.pools.release_entry(old);
        }
        Ok(evicted)
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&self, key: &str) -> bool {
        match self.shard_for(key).remove(key) {
            Some(entry) => {
                self.pools.release_entry(entry);
                true
            }
            None => false,
        }
    }

    /// Sweep every shard for expired entries, returning how many were removed
    pub fn drain_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in self.shards.iter() {
            for entry in shard.drain_expired(now) {
                removed += 1;
                self.pools.release_entry(entry);
            }
        }
        if removed > 0 {
            self.expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            for entry in shard.clear() {
                self.pools.release_entry(entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn used_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.used_bytes()).sum()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            entries: self.len() as u64,
            used_bytes: self.used_bytes(),
            capacity_bytes: self.capacity,
            shard_count: self.shard_count(),
            shard_budget: self.shard_budget,
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            expirations: self.expirations(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Payload;
    use proptest::prelude::*;
    use std::time::Duration;

    fn make_entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::new(key, Payload::Raw(vec![0xAB; size]), size as u64, CacheTier::L1)
    }

    fn make_tier(capacity: u64, shards: usize) -> ShardedTier {
        ShardedTier::new(CacheTier::L1, capacity, shards, Arc::new(Pools::new(16, 4))).unwrap()
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_shard_routing_is_stable_and_spread() {
        let tier = make_tier(1 << 30, 256);
        let mut counts = vec![0usize; 256];
        for i in 0..25_600 {
            let key = format!("object-{}", i);
            let idx = tier.shard_index(&key);
            assert_eq!(idx, tier.shard_index(&key));
            assert_eq!(idx as u64, fnv1a_64(key.as_bytes()) % 256);
            counts[idx] += 1;
        }
        let max = *counts.iter().max().unwrap();
        assert!(max < 300, "uneven distribution: max {}", max);
    }

    #[test]
    fn test_insert_get_remove() {
        let shard = Shard::new(CacheTier::L1, 1024);
        shard.insert(make_entry("a", 100)).unwrap();

        assert_eq!(shard.used_bytes(), 100);
        assert!(shard.contains("a"));
        assert!(matches!(shard.lookup("a", Instant::now()), Lookup::Hit(_)));

        let removed = shard.remove("a").unwrap();
        assert_eq!(removed.size(), 100);
        assert_eq!(shard.used_bytes(), 0);
        assert!(shard.remove("a").is_none());
    }

    #[test]
    fn test_lookup_records_access() {
        let shard = Shard::new(CacheTier::L1, 1024);
        shard.insert(make_entry("a", 10)).unwrap();

        shard.lookup("a", Instant::now());
        shard.lookup("a", Instant::now());
        assert_eq!(shard.peek("a").unwrap().access_count(), 2);
    }

    #[test]
    fn test_oversized_rejected_without_eviction() {
        let shard = Shard::new(CacheTier::L2, 1000);
        shard.insert(make_entry("keep", 600)).unwrap();

        let err = shard.insert(make_entry("huge", 1001)).unwrap_err();
        assert!(err.is_capacity());
        assert!(shard.contains("keep"));
        assert_eq!(shard.used_bytes(), 600);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let shard = Shard::new(CacheTier::L1, 300);
        shard.insert(make_entry("a", 100)).unwrap();
        shard.insert(make_entry("b", 100)).unwrap();
        shard.insert(make_entry("c", 100)).unwrap();

        // "a" becomes most recently used
        shard.lookup("a", Instant::now());

        let outcome = shard.insert(make_entry("d", 100)).unwrap();
        let evicted: Vec<&str> = outcome.evicted.iter().map(|e| e.key()).collect();
        assert_eq!(evicted, vec!["b"]);
        assert!(shard.contains("a"));
        assert!(shard.contains("c"));
        assert!(shard.contains("d"));
        assert_eq!(shard.used_bytes(), 300);
    }

    #[test]
    fn test_evicts_until_fit() {
        let shard = Shard::new(CacheTier::L1, 300);
        for key in ["a", "b", "c"] {
            shard.insert(make_entry(key, 100)).unwrap();
        }

        let outcome = shard.insert(make_entry("big", 250)).unwrap();
        assert_eq!(outcome.evicted.len(), 3);
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.used_bytes(), 250);
    }

    #[test]
    fn test_replace_same_key() {
        let shard = Shard::new(CacheTier::L1, 300);
        shard.insert(make_entry("a", 200)).unwrap();

        let outcome = shard.insert(make_entry("a", 250)).unwrap();
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.replaced.unwrap().size(), 200);
        assert_eq!(shard.used_bytes(), 250);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_drain_expired() {
        let shard = Shard::new(CacheTier::L2, 1000);
        let mut short = CacheEntry::blank();
        short.prepare(
            "short",
            Payload::Raw(vec![0; 10]),
            10,
            CacheTier::L2,
            HashMap::new(),
            Some(Duration::from_millis(5)),
        );
        shard.insert(short).unwrap();
        shard.insert(make_entry("forever", 10)).unwrap();

        let later = Instant::now() + Duration::from_millis(50);
        assert!(matches!(shard.lookup("short", later), Lookup::Expired));

        let drained = shard.drain_expired(later);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].key(), "short");
        assert_eq!(shard.used_bytes(), 10);
        assert!(shard.contains("forever"));
    }

    #[test]
    fn test_tier_counts_and_recycles_evictions() {
        let pools = Arc::new(Pools::new(16, 4));
        let tier = ShardedTier::new(CacheTier::L1, 200, 1, Arc::clone(&pools)).unwrap();

        tier.insert(make_entry("a", 100)).unwrap();
        tier.insert(make_entry("b", 100)).unwrap();
        let evicted = tier.insert(make_entry("c", 100)).unwrap();

        assert_eq!(evicted, 1);
        assert_eq!(tier.evictions(), 1);
        assert!(!tier.contains("a"));
        assert_eq!(pools.stats().entries_returned, 1);
    }

    #[test]
    fn test_tier_hit_miss_counters() {
        let tier = make_tier(1 << 20, 4);
        tier.insert(make_entry("a", 10)).unwrap();

        assert!(tier.get("a").is_some());
        assert!(tier.get("nope").is_none());
        assert_eq!(tier.hits(), 1);
        assert_eq!(tier.misses(), 1);
    }

    #[test]
    fn test_tier_rejects_bad_geometry() {
        let pools = Arc::new(Pools::default());
        assert!(ShardedTier::new(CacheTier::L1, 1024, 0, Arc::clone(&pools)).is_err());
        assert!(ShardedTier::new(CacheTier::L1, 10, 16, pools).is_err());
    }

    #[test]
    fn test_tier_clear() {
        let tier = make_tier(1 << 20, 8);
        for i in 0..50 {
            tier.insert(make_entry(&format!("k{}", i), 64)).unwrap();
        }
        assert_eq!(tier.len(), 50);
        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.used_bytes(), 0);
    }

    #[test]
    fn test_concurrent_inserts_respect_budget() {
        let tier = Arc::new(make_tier(64 * 1024, 4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = Arc::clone(&tier);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("t{}-{}", t, i);
                        tier.insert(make_entry(&key, 512)).unwrap();
                        tier.get(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for shard in tier.shards() {
            assert!(shard.used_bytes() <= shard.budget());
        }
    }

    proptest! {
        #[test]
        fn prop_used_bytes_never_exceeds_budget(
            ops in prop::collection::vec((0u8..32, 1usize..400, any::<bool>()), 1..200)
        ) {
            let shard = Shard::new(CacheTier::L1, 1000);
            for (key, size, read) in ops {
                let key = format!("k{}", key);
                if read {
                    shard.lookup(&key, Instant::now());
                }
                shard.insert(make_entry(&key, size)).unwrap();
                prop_assert!(shard.used_bytes() <= shard.budget());

                let state = shard.state.read();
                let total: u64 = state.entries.values().map(|e| e.size()).sum();
                prop_assert_eq!(total, state.used_bytes);
                prop_assert_eq!(state.lru.len(), state.entries.len());
            }
        }
    }
}
