//! Cache Metrics Collection
//!
//! Atomic counters updated on the hot path and a point-in-time snapshot for
//! reporting. Nothing here takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::compression::CompressionStatsSnapshot;
use super::entry::CacheTier;
use super::pool::PoolStats;

// =============================================================================
// Latency Histogram
// =============================================================================

/// Number of power-of-two microsecond buckets (last bound ~36 minutes)
const LATENCY_BUCKETS: usize = 32;

/// Lock-free latency histogram with power-of-two microsecond buckets
///
/// Bucket `i` counts observations in `(2^(i-1), 2^i]` microseconds; bucket 0
/// holds everything up to 1µs. Quantiles report the upper bound of the
/// bucket they fall in.
pub struct LatencyHistogram {
    buckets: Vec<AtomicU64>,
    sum_ns: AtomicU64,
    count: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..LATENCY_BUCKETS).map(|_| AtomicU64::new(0)).collect(),
            sum_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn bucket_index(micros: u64) -> usize {
        if micros <= 1 {
            return 0;
        }
        let idx = (64 - (micros - 1).leading_zeros()) as usize;
        idx.min(LATENCY_BUCKETS - 1)
    }

    /// Upper bound of bucket `idx`
    pub fn bucket_bound(idx: usize) -> Duration {
        Duration::from_micros(1u64 << idx.min(LATENCY_BUCKETS - 1))
    }

    pub fn observe(&self, duration: Duration) {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        self.buckets[Self::bucket_index(micros)].fetch_add(1, Ordering::Relaxed);
        self.sum_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn average(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.sum_ns.load(Ordering::Relaxed) / count)
    }

    /// Approximate quantile `q` in `[0, 1]`
    pub fn quantile(&self, q: f64) -> Duration {
        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = ((q.clamp(0.0, 1.0) * total as f64).ceil() as u64).max(1);
        let mut seen = 0;
        for (idx, count) in counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return Self::bucket_bound(idx);
            }
        }
        Self::bucket_bound(LATENCY_BUCKETS - 1)
    }
}

// =============================================================================
// Cache Stats
// =============================================================================

/// Live cache counters
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
    set_failures: AtomicU64,

    promotions_enqueued: AtomicU64,
    promotions_completed: AtomicU64,
    promotions_dropped: AtomicU64,
    promotions_failed: AtomicU64,

    prefetches: AtomicU64,

    get_latency: LatencyHistogram,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, tier: CacheTier) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let counter = match tier {
            CacheTier::L1 => &self.l1_hits,
            CacheTier::L2 => &self.l2_hits,
            CacheTier::L3 => &self.l3_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        if count > 0 {
            self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_set(&self, ok: bool) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.set_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_get_latency(&self, duration: Duration) {
        self.get_latency.observe(duration);
    }

    // Promotion tracking
    pub fn record_promotion_enqueued(&self) {
        self.promotions_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion_completed(&self) {
        self.promotions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion_dropped(&self) {
        self.promotions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion_failed(&self) {
        self.promotions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
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

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Counter snapshot; tier occupancy and component stats are left at
    /// their defaults for the owner to fill in
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l3_hits: self.l3_hits.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
            sets: self.sets.load(Ordering::Relaxed),
            set_failures: self.set_failures.load(Ordering::Relaxed),
            promotions_enqueued: self.promotions_enqueued.load(Ordering::Relaxed),
            promotions_completed: self.promotions_completed.load(Ordering::Relaxed),
            promotions_dropped: self.promotions_dropped.load(Ordering::Relaxed),
            promotions_failed: self.promotions_failed.load(Ordering::Relaxed),
            prefetches: self.prefetches.load(Ordering::Relaxed),
            avg_latency_us: self.get_latency.average().as_secs_f64() * 1e6,
            p50_latency_us: self.get_latency.quantile(0.50).as_micros() as u64,
            p99_latency_us: self.get_latency.quantile(0.99).as_micros() as u64,
            ..Default::default()
        }
    }
}

/// Point-in-time view of the cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub hit_ratio: f64,
    pub evictions: u64,
    /// L2 entries dropped for TTL
    pub expirations: u64,
    pub sets: u64,
    pub set_failures: u64,

    // Latency of `get`
    pub avg_latency_us: f64,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,

    // Occupancy
    pub l1_bytes: u64,
    pub l1_entries: u64,
    pub l2_bytes: u64,
    pub l2_entries: u64,

    // Tier movement
    pub promotions_enqueued: u64,
    pub promotions_completed: u64,
    pub promotions_dropped: u64,
    pub promotions_failed: u64,
    pub prefetches: u64,

    // Cold store
    pub cold_read_errors: u64,
    pub cold_write_errors: u64,

    /// `compressed / uncompressed` over accepted payloads
    pub compression_ratio: f64,
    pub compression: CompressionStatsSnapshot,
    pub pools: PoolStats,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
