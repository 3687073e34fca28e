//! TierCache - Multi-Tier Sharded Object Cache
//!
//! A read-through cache for immutable binary objects spread over three tiers:
//!
//! ```text
//! get ──▶ L1 (RAM) ──miss──▶ L2 (NVMe) ──miss──▶ L3 (cold store) ──miss──▶ None
//!            ▲                  │  ▲                  │
//!            └──── promote ─────┘  └───── promote ────┘
//! ```
//!
//! # Features
//!
//! - 256-way sharded L1/L2 with per-shard byte budgets and exact LRU eviction
//! - Size-based placement (L1 < 100MB, L2 < 1GB, cold store otherwise)
//! - Opportunistic zstd/LZ4 compression under a bounded slot pool
//! - Bounded asynchronous promotion on L2/L3 hits
//! - TTL expiry for L2 with a background sweeper
//! - Pooled entry records and payload buffers
//! - Prometheus metrics exposition
//!
//! # Modules
//!
//! - [`cache`] - Tiers, shards, compression, workers and the manager
//! - [`error`] - Error types
//! - [`monitoring`] - Prometheus exporter and HTTP endpoint
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use tiercache::cache::CacheManager;
//!
//! # async fn demo() -> tiercache::Result<()> {
//! let cache = CacheManager::in_memory()?;
//! cache.set("object", b"payload".to_vec(), HashMap::new()).await?;
//! assert!(cache.get("object").await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod monitoring;

pub use cache::{CacheConfig, CacheManager, CacheStatsSnapshot, CacheTier, ColdStore};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
