//! Three-Tiered Sharded Cache
//!
//! L1 (RAM), L2 (local NVMe) and L3 (cold store) tiers behind a single manager.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        Cache Manager                                      │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L1 Cache (RAM)       │ L2 Cache (NVMe)     │ L3 Cold Store (adapter)   │
//! │  ┌────────────────┐   │ ┌────────────────┐  │ ┌────────────────────┐    │
//! │  │ ShardedTier    │   │ │ ShardedTier    │  │ │ dyn ColdStore      │    │
//! │  │ (256-way)      │   │ │ + TTL sweep    │  │ │ (async trait)      │    │
//! │  │ < 100MB objs   │   │ │ < 1GB objs     │  │ │ everything else    │    │
//! │  └────────────────┘   │ └────────────────┘  │ └────────────────────┘    │
//! │         ▲             │         ▲           │           │               │
//! │         └──── promote ┴─────────┴── promote ┴───────────┘               │
//! │                                                                          │
//! │   Compression slots (zstd/LZ4)   Entry + buffer pools   Atomic stats    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - No global lock: every shard has its own `RwLock`
//! - Hit bookkeeping is lock-free (atomics under the shared read lock)
//! - Background work (compression, promotion) degrades to "skip" under saturation
//! - Entry records and payload buffers are recycled through bounded pools

pub mod compression;
mod entry;
mod epoch;
mod l1;
mod l2;
mod l3;
mod lru;
mod manager;
mod metrics;
mod policy;
mod pool;
mod prefetch;
mod shard;
mod workers;

pub use compression::{
    CompressionAlgorithm, CompressionConfig, CompressionEngine, CompressionOutcome,
    CompressionStatsSnapshot, Compressor,
};
pub use entry::{access_stamp, CacheEntry, CacheTier, Payload};
pub use l1::{L1Cache, L1Config};
pub use l2::{L2Cache, L2Config};
pub use l3::{ColdObject, ColdStore, ColdStoreStats, ColdTier, InMemoryColdStore};
pub use lru::LruTracker;
pub use manager::{BatchSetReport, CacheConfig, CacheManager, SetRequest};
pub use metrics::{CacheStats, CacheStatsSnapshot, LatencyHistogram, LatencyTracker};
pub use policy::PlacementPolicy;
pub use pool::{BufferPool, EntryPool, PoolStats, Pools, BUFFER_SIZE_CLASSES};
pub use prefetch::{NoopPrefetcher, PrefetchConfig, Prefetcher};
pub use shard::{fnv1a_64, InsertOutcome, Shard, ShardedTier, TierStats};
pub use workers::{PromotionConfig, PromotionTask};

/// Default number of shards per tier
pub const DEFAULT_SHARD_COUNT: usize = 256;

/// Default L1 capacity (64GB, 256MB per shard at the default shard count)
pub const DEFAULT_L1_CAPACITY: u64 = 64 * 1024 * 1024 * 1024;

/// Default L2 capacity (512GB, 2GB per shard at the default shard count)
pub const DEFAULT_L2_CAPACITY: u64 = 512 * 1024 * 1024 * 1024;

/// Objects below this size are placed in L1 (100MB)
pub const DEFAULT_L1_MAX_OBJECT_SIZE: u64 = 100 * 1024 * 1024;

/// Objects below this size (and not in L1) are placed in L2 (1GB)
pub const DEFAULT_L2_MAX_OBJECT_SIZE: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shard_budgets_fit_threshold_objects() {
        let l1_shard = DEFAULT_L1_CAPACITY / DEFAULT_SHARD_COUNT as u64;
        let l2_shard = DEFAULT_L2_CAPACITY / DEFAULT_SHARD_COUNT as u64;

        // Largest L1/L2 objects must fit in a single shard
        assert!(l1_shard >= DEFAULT_L1_MAX_OBJECT_SIZE);
        assert!(l2_shard >= DEFAULT_L2_MAX_OBJECT_SIZE);
    }

    #[test]
    fn test_threshold_ordering() {
        assert!(DEFAULT_L1_MAX_OBJECT_SIZE < DEFAULT_L2_MAX_OBJECT_SIZE);
    }
}
