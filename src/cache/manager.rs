//! Unified Cache Manager
//!
//! Coordinates the L1, L2 and cold tiers:
//!
//! - `get` checks L1 → L2 → cold store and stops at the first hit. L2 and
//!   cold hits queue an asynchronous promotion one tier up.
//! - `set` places an object by size, compresses it opportunistically and
//!   inserts it into the owning shard, evicting first if needed.
//!
//! Writes to the local tiers and promotions serialize on a per-key stripe of
//! [`WriteEpochs`]. A promotion built from a read that precedes a `set`,
//! `invalidate` or `clear` of its key is discarded rather than applied.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::compression::{CompressionConfig, CompressionEngine, CompressionOutcome};
use super::entry::{access_stamp, CacheEntry, CacheTier, Payload};
use super::epoch::WriteEpochs;
use super::l1::{L1Cache, L1Config};
use super::l2::{L2Cache, L2Config};
use super::l3::{ColdObject, ColdStore, ColdTier, InMemoryColdStore};
use super::metrics::{CacheStats, CacheStatsSnapshot, LatencyTracker};
use super::policy::PlacementPolicy;
use super::pool::{Pools, DEFAULT_BUFFERS_PER_CLASS, DEFAULT_ENTRY_POOL_CAPACITY};
use super::prefetch::{NoopPrefetcher, PrefetchConfig, Prefetcher};
use super::workers::{self, PromotionConfig, PromotionTask};
use super::DEFAULT_SHARD_COUNT;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shards per local tier
    pub shard_count: usize,
    /// L1 configuration
    pub l1: L1Config,
    /// L2 configuration
    pub l2: L2Config,
    /// Size thresholds for tier placement
    pub placement: PlacementPolicy,
    pub compression: CompressionConfig,
    pub promotion: PromotionConfig,
    pub prefetch: PrefetchConfig,
    /// Also persist L1/L2 objects to the cold store on `set`
    pub write_through: bool,
    /// Expiry attached to objects written to the cold store
    pub cold_ttl_secs: Option<u64>,
    /// Idle entry records kept for reuse
    pub entry_pool_capacity: usize,
    /// Idle buffers kept per size class
    pub buffers_per_class: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            l1: L1Config::default(),
            l2: L2Config::default(),
            placement: PlacementPolicy::default(),
            compression: CompressionConfig::default(),
            promotion: PromotionConfig::default(),
            prefetch: PrefetchConfig::default(),
            write_through: false,
            cold_ttl_secs: Some(7 * 24 * 60 * 60), // 7 days
            entry_pool_capacity: DEFAULT_ENTRY_POOL_CAPACITY,
            buffers_per_class: DEFAULT_BUFFERS_PER_CLASS,
        }
    }
}

impl CacheConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid cache config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&yaml)
    }

    pub fn cold_ttl(&self) -> Option<Duration> {
        self.cold_ttl_secs.map(Duration::from_secs)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(Error::Config("shard_count must be > 0".into()));
        }
        if self.l1.capacity_bytes / (self.shard_count as u64) == 0 {
            return Err(Error::Config(format!(
                "l1.capacity_bytes {} leaves no budget for {} shards",
                self.l1.capacity_bytes, self.shard_count
            )));
        }
        if self.l2.capacity_bytes / (self.shard_count as u64) == 0 {
            return Err(Error::Config(format!(
                "l2.capacity_bytes {} leaves no budget for {} shards",
                self.l2.capacity_bytes, self.shard_count
            )));
        }
        if self.l2.sweep_interval_ms == 0 {
            return Err(Error::Config("l2.sweep_interval_ms must be > 0".into()));
        }
        if self.compression.workers == 0 {
            return Err(Error::Config("compression.workers must be > 0".into()));
        }
        if !(self.compression.max_ratio > 0.0 && self.compression.max_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "compression.max_ratio must be in (0, 1], got {}",
                self.compression.max_ratio
            )));
        }
        if self.promotion.workers == 0 {
            return Err(Error::Config("promotion.workers must be > 0".into()));
        }
        if self.promotion.queue_capacity == 0 {
            return Err(Error::Config("promotion.queue_capacity must be > 0".into()));
        }
        self.placement.validate()
    }
}

// =============================================================================
// Batch Types
// =============================================================================

/// One item of a batch `set`
#[derive(Debug, Clone)]
pub struct SetRequest {
    pub key: String,
    pub data: Bytes,
    pub metadata: HashMap<String, String>,
}

impl SetRequest {
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of a batch `set`
///
/// Successful items keep their effect even when others fail; nothing is
/// rolled back.
#[derive(Debug, Default)]
pub struct BatchSetReport {
    /// Key → tier it was stored in
    pub stored: HashMap<String, CacheTier>,
    /// Per-key failures, in completion order
    pub failed: Vec<(String, Error)>,
    /// Keys never attempted because the batch was cancelled
    pub abandoned: Vec<String>,
}

impl BatchSetReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty()
    }

    pub fn first_error(&self) -> Option<&Error> {
        self.failed.first().map(|(_, e)| e)
    }

    /// The stored map, or the first failure
    pub fn into_result(mut self) -> Result<HashMap<String, CacheTier>> {
        if !self.failed.is_empty() {
            let (_, err) = self.failed.swap_remove(0);
            return Err(err);
        }
        if !self.abandoned.is_empty() {
            return Err(Error::Cancelled(format!(
                "batch set abandoned {} item(s)",
                self.abandoned.len()
            )));
        }
        Ok(self.stored)
    }
}

// =============================================================================
// Shared Core
// =============================================================================

/// State shared by the manager handle and its background workers
pub(crate) struct Core {
    pub(crate) config: CacheConfig,
    pub(crate) l1: L1Cache,
    pub(crate) l2: L2Cache,
    pub(crate) cold: ColdTier,
    pub(crate) compression: Arc<CompressionEngine>,
    pub(crate) pools: Arc<Pools>,
    pub(crate) stats: CacheStats,
    prefetcher: Arc<dyn Prefetcher>,
    promotions: mpsc::Sender<PromotionTask>,
    epochs: WriteEpochs,
    cancel: CancellationToken,
}

impl Core {
    fn shard_budget(&self, tier: CacheTier) -> Option<u64> {
        match tier {
            CacheTier::L1 => Some(self.l1.shard_budget()),
            CacheTier::L2 => Some(self.l2.shard_budget()),
            CacheTier::L3 => None,
        }
    }

    /// Check out a pooled record for `tier`
    fn build_entry(
        &self,
        key: &str,
        payload: Payload,
        size: u64,
        tier: CacheTier,
        metadata: HashMap<String, String>,
    ) -> CacheEntry {
        let ttl = match tier {
            CacheTier::L2 => self.l2.ttl(),
            _ => None,
        };
        let mut entry = self.pools.entries.checkout();
        entry.prepare(key, payload, size, tier, metadata, ttl);
        entry
    }

    /// Insert into a local tier, accounting for evictions
    fn store_local(&self, tier: CacheTier, entry: CacheEntry) -> Result<()> {
        let evicted = match tier {
            CacheTier::L1 => self.l1.insert(entry)?,
            CacheTier::L2 => self.l2.insert(entry)?,
            CacheTier::L3 => {
                return Err(Error::Internal(format!(
                    "'{}' cannot be stored locally in {}",
                    entry.key(),
                    tier
                )))
            }
        };
        self.stats.record_evictions(evicted);
        Ok(())
    }

    /// Raw bytes in a pooled buffer
    fn raw_payload(&self, data: &Bytes) -> Payload {
        let mut buf = self.pools.buffers.checkout(data.len());
        buf.extend_from_slice(data);
        Payload::Raw(buf)
    }

    fn cold_object(&self, payload: &Payload, size: u64, metadata: HashMap<String, String>) -> ColdObject {
        ColdObject::new(
            Bytes::copy_from_slice(payload.stored()),
            payload.algorithm(),
            size,
            metadata,
        )
        .with_ttl(self.config.cold_ttl())
    }

    async fn store(
        &self,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<CacheTier> {
        let size = data.len() as u64;
        let tier = self.config.placement.target_tier(size);

        if let Some(budget) = self.shard_budget(tier) {
            if size > budget {
                return Err(Error::CapacityExceeded {
                    tier,
                    key: key.to_string(),
                    size,
                    budget,
                });
            }
        }

        let outcome = self.compression.maybe_compress(&data).await;

        if tier == CacheTier::L3 {
            let object = match outcome {
                CompressionOutcome::Accepted {
                    data: compressed,
                    algorithm,
                    ..
                } => ColdObject::new(Bytes::from(compressed), algorithm, size, metadata),
                _ => ColdObject::raw(data, metadata),
            }
            .with_ttl(self.config.cold_ttl());
            self.cold.put(key, &object).await?;

            // Drop shadowed local copies
            self.evict_local(key);
            return Ok(tier);
        }

        let payload = match outcome {
            CompressionOutcome::Accepted {
                data: compressed,
                algorithm,
                ..
            } => Payload::Compressed {
                data: compressed,
                algorithm,
            },
            _ => self.raw_payload(&data),
        };

        if self.config.write_through {
            let object = self.cold_object(&payload, size, metadata.clone());
            if let Err(e) = self.cold.put(key, &object).await {
                self.pools.buffers.release(payload.into_buffer());
                return Err(e);
            }
        }

        let entry = self.build_entry(key, payload, size, tier, metadata);
        let mut epoch = self.epochs.lock(key);
        self.store_local(tier, entry)?;
        match tier {
            CacheTier::L1 => self.l2.remove(key),
            _ => self.l1.remove(key),
        };
        epoch.mark_written();
        Ok(tier)
    }

    /// Remove `key` from both local tiers and mark its stripe written
    fn evict_local(&self, key: &str) {
        let mut epoch = self.epochs.lock(key);
        self.l1.remove(key);
        self.l2.remove(key);
        epoch.mark_written();
    }

    fn clear_local(&self) {
        let mut stripes = self.epochs.lock_all();
        self.l1.clear();
        self.l2.clear();
        for epoch in &mut stripes {
            epoch.mark_written();
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<Bytes>> {
        // Taken before any tier is read; promotions compare it against
        // later writes
        let observed = access_stamp();

        if let Some(entry) = self.l1.get(key) {
            self.stats.record_hit(CacheTier::L1);
            let data = entry.data()?;
            self.trigger_prefetch(key);
            return Ok(Some(data));
        }

        if let Some(entry) = self.l2.get(key) {
            self.stats.record_hit(CacheTier::L2);
            let data = entry.data()?;
            if let Some(destination) = CacheTier::L2.promotion_target() {
                self.enqueue_promotion(key, || {
                    PromotionTask::from_entry(&entry, destination, observed, &self.pools.buffers)
                });
            }
            return Ok(Some(data));
        }

        if let Some((object, data)) = self.cold.get(key).await {
            self.stats.record_hit(CacheTier::L3);
            if let Some(destination) = CacheTier::L3.promotion_target() {
                self.enqueue_promotion(key, || {
                    PromotionTask::from_cold(key, &object, destination, observed, &self.pools.buffers)
                });
            }
            return Ok(Some(data));
        }

        self.stats.record_miss();
        Ok(None)
    }

    /// Queue a promotion without waiting; the task is only built when a
    /// slot is free
    fn enqueue_promotion(&self, key: &str, task: impl FnOnce() -> PromotionTask) {
        if self.cancel.is_cancelled() {
            self.stats.record_promotion_dropped();
            return;
        }
        match self.promotions.try_reserve() {
            Ok(permit) => {
                permit.send(task());
                self.stats.record_promotion_enqueued();
            }
            Err(_) => {
                self.stats.record_promotion_dropped();
                debug!(key, "Promotion queue full, dropping promotion");
            }
        }
    }

    /// Insert a promoted copy unless the destination already holds the key
    ///
    /// Returns `Ok(false)` when the key was written or invalidated after the
    /// promotion's source was read; the task is discarded.
    pub(crate) fn apply_promotion(&self, task: PromotionTask) -> Result<bool> {
        let PromotionTask {
            key,
            payload,
            size,
            metadata,
            destination,
            observed,
        } = task;

        if destination == CacheTier::L3 {
            self.pools.buffers.release(payload.into_buffer());
            return Err(Error::Internal("promotion into the cold store".into()));
        }

        let epoch = self.epochs.lock(&key);
        if epoch.written_since(observed) {
            self.pools.buffers.release(payload.into_buffer());
            return Ok(false);
        }

        let present = match destination {
            CacheTier::L1 => self.l1.contains(&key),
            _ => self.l2.contains(&key),
        };
        if present {
            self.pools.buffers.release(payload.into_buffer());
            return Ok(true);
        }

        let entry = self.build_entry(&key, payload, size, destination, metadata);
        self.store_local(destination, entry)?;
        Ok(true)
    }

    fn trigger_prefetch(&self, key: &str) {
        if !self.config.prefetch.enabled {
            return;
        }
        self.stats.record_prefetch();
        let prefetcher = Arc::clone(&self.prefetcher);
        let key = key.to_string();
        tokio::spawn(async move {
            prefetcher.trigger_prefetch(&key).await;
        });
    }
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Background task handles; dropping the last manager handle cancels them
struct WorkerSet {
    cancel: CancellationToken,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Unified cache manager
///
/// Cheap to clone; all clones share the same tiers and workers.
#[derive(Clone)]
pub struct CacheManager {
    core: Arc<Core>,
    workers: Arc<WorkerSet>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager").finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Create a manager over `cold` and start its background workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: CacheConfig, cold: Arc<dyn ColdStore>) -> Result<Self> {
        Self::with_prefetcher(config, cold, Arc::new(NoopPrefetcher))
    }

    /// Create a manager with a custom prefetch strategy
    pub fn with_prefetcher(
        config: CacheConfig,
        cold: Arc<dyn ColdStore>,
        prefetcher: Arc<dyn Prefetcher>,
    ) -> Result<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Config(
                "CacheManager must be created inside a Tokio runtime".into(),
            ));
        }

        let pools = Arc::new(Pools::new(
            config.entry_pool_capacity,
            config.buffers_per_class,
        ));
        let l1 = L1Cache::new(config.l1.clone(), config.shard_count, Arc::clone(&pools))?;
        let l2 = L2Cache::new(config.l2.clone(), config.shard_count, Arc::clone(&pools))?;
        let (tx, rx) = mpsc::channel(config.promotion.queue_capacity);
        let cancel = CancellationToken::new();

        let core = Arc::new(Core {
            l1,
            l2,
            cold: ColdTier::new(cold),
            compression: Arc::new(CompressionEngine::new(config.compression.clone())),
            pools,
            stats: CacheStats::new(),
            prefetcher,
            promotions: tx,
            epochs: WriteEpochs::default(),
            cancel: cancel.clone(),
            config,
        });

        let mut handles = workers::spawn_promotion_workers(
            Arc::clone(&core),
            rx,
            core.config.promotion.workers,
            cancel.clone(),
        );
        handles.push(workers::spawn_ttl_sweeper(
            Arc::clone(&core),
            core.config.l2.sweep_interval(),
            cancel.clone(),
        ));

        info!(
            shards = core.config.shard_count,
            l1_capacity = core.config.l1.capacity_bytes,
            l2_capacity = core.config.l2.capacity_bytes,
            promotion_workers = core.config.promotion.workers,
            compression = %core.config.compression.algorithm,
            "Cache manager started"
        );

        Ok(Self {
            core,
            workers: Arc::new(WorkerSet {
                cancel,
                handles: parking_lot::Mutex::new(handles),
            }),
        })
    }

    /// Default configuration over an in-memory cold store
    pub fn in_memory() -> Result<Self> {
        Self::new(CacheConfig::default(), Arc::new(InMemoryColdStore::new()))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    pub fn l1(&self) -> &L1Cache {
        &self.core.l1
    }

    pub fn l2(&self) -> &L2Cache {
        &self.core.l2
    }

    /// Fetch an object, probing L1, L2 and the cold store in order
    ///
    /// A miss in every tier is `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let tracker = LatencyTracker::start();
        let result = self.core.lookup(key).await;
        self.core.stats.record_get_latency(tracker.elapsed());
        result
    }

    /// Store an object, returning the tier it was placed in
    pub async fn set(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) -> Result<CacheTier> {
        let result = self.core.store(key, data.into(), metadata).await;
        self.core.stats.record_set(result.is_ok());
        result
    }

    /// Remove `key` from every tier
    ///
    /// Local tiers are cleared before the cold store is asked; a cold store
    /// failure is returned after that.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.core.evict_local(key);
        let deleted = self.core.cold.delete(key).await;
        // Promotions read from the cold store during the delete
        self.core.evict_local(key);
        deleted
    }

    /// Whether `key` is held in L1 or L2
    pub fn contains(&self, key: &str) -> bool {
        self.core.l1.contains(key) || self.core.l2.contains(key)
    }

    /// Empty both local tiers; the cold store is untouched
    pub fn clear(&self) {
        self.core.clear_local();
    }

    /// Run an L2 expiry sweep now, returning how many entries were removed
    pub fn sweep_expired(&self) -> usize {
        self.core.l2.drain_expired()
    }

    pub async fn batch_get(&self, keys: &[String]) -> HashMap<String, Bytes> {
        self.batch_get_with_cancel(keys, &CancellationToken::new())
            .await
    }

    /// Fetch many keys on a fixed worker pool
    ///
    /// Missing keys and per-key errors are simply absent from the result.
    /// Once `cancel` fires, keys not yet started are skipped.
    pub async fn batch_get_with_cancel(
        &self,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> HashMap<String, Bytes> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let queue = Arc::new(SegQueue::new());
        for key in keys {
            queue.push(key.clone());
        }
        let results = Arc::new(parking_lot::Mutex::new(HashMap::with_capacity(keys.len())));

        let mut set = JoinSet::new();
        for _ in 0..batch_workers(keys.len()) {
            let manager = self.clone();
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let cancel = cancel.clone();
            set.spawn(async move {
                while !cancel.is_cancelled() {
                    let Some(key) = queue.pop() else { break };
                    match manager.get(&key).await {
                        Ok(Some(data)) => {
                            results.lock().insert(key, data);
                        }
                        Ok(None) => {}
                        Err(e) => debug!(key = %key, error = %e, "Batch get failed for key"),
                    }
                }
            });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Batch get worker panicked");
            }
        }

        let results = std::mem::take(&mut *results.lock());
        results
    }

    pub async fn batch_set(&self, items: Vec<SetRequest>) -> BatchSetReport {
        self.batch_set_with_cancel(items, &CancellationToken::new())
            .await
    }

    /// Store many objects on a fixed worker pool
    ///
    /// Partial success is kept; see [`BatchSetReport`].
    pub async fn batch_set_with_cancel(
        &self,
        items: Vec<SetRequest>,
        cancel: &CancellationToken,
    ) -> BatchSetReport {
        if items.is_empty() {
            return BatchSetReport::default();
        }

        let workers = batch_workers(items.len());
        let queue = Arc::new(SegQueue::new());
        for item in items {
            queue.push(item);
        }
        let report = Arc::new(parking_lot::Mutex::new(BatchSetReport::default()));

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let manager = self.clone();
            let queue = Arc::clone(&queue);
            let report = Arc::clone(&report);
            let cancel = cancel.clone();
            set.spawn(async move {
                while !cancel.is_cancelled() {
                    let Some(item) = queue.pop() else { break };
                    let result = manager.set(&item.key, item.data, item.metadata).await;
                    let mut guard = report.lock();
                    match result {
                        Ok(tier) => {
                            guard.stored.insert(item.key, tier);
                        }
                        Err(e) => guard.failed.push((item.key, e)),
                    }
                }
            });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Batch set worker panicked");
            }
        }

        let mut report = std::mem::take(&mut *report.lock());
        while let Some(item) = queue.pop() {
            report.abandoned.push(item.key);
        }
        report
    }

    /// Live statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let core = &self.core;
        let mut snapshot = core.stats.snapshot();

        let l1 = core.l1.stats();
        let l2 = core.l2.stats();
        snapshot.l1_bytes = l1.used_bytes;
        snapshot.l1_entries = l1.entries;
        snapshot.l2_bytes = l2.used_bytes;
        snapshot.l2_entries = l2.entries;
        snapshot.expirations = l2.expirations;

        snapshot.cold_read_errors = core.cold.read_errors();
        snapshot.cold_write_errors = core.cold.write_errors();

        snapshot.compression = core.compression.stats();
        snapshot.compression_ratio = snapshot.compression.ratio();
        snapshot.pools = core.pools.stats();
        snapshot
    }

    pub fn is_shutdown(&self) -> bool {
        self.workers.cancel.is_cancelled()
    }

    /// Stop background workers, waiting at most `deadline`
    ///
    /// Calling it again after a successful shutdown is a no-op.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.workers.cancel.cancel();
        let handles = std::mem::take(&mut *self.workers.handles.lock());
        if handles.is_empty() {
            return Ok(());
        }

        info!(workers = handles.len(), ?deadline, "Shutting down cache manager");
        let result = workers::join_with_deadline(handles, deadline).await;
        match &result {
            Ok(()) => info!("Cache manager stopped"),
            Err(e) => warn!(error = %e, "Cache manager shutdown incomplete"),
        }
        result
    }
}

/// `min(available_parallelism, items)`
fn batch_workers(items: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(items)
        .max(1)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn small_config() -> CacheConfig {
        CacheConfig {
            shard_count: 4,
            l1: L1Config {
                capacity_bytes: 64 * 1024,
            },
            l2: L2Config {
                capacity_bytes: 256 * 1024,
                ..Default::default()
            },
            placement: PlacementPolicy::new(1024, 16 * 1024),
            promotion: PromotionConfig {
                workers: 2,
                queue_capacity: 16,
            },
            ..Default::default()
        }
    }

    fn make_manager(config: CacheConfig) -> (CacheManager, Arc<InMemoryColdStore>) {
        let cold = Arc::new(InMemoryColdStore::new());
        let manager = CacheManager::new(config, cold.clone()).unwrap();
        (manager, cold)
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert_eq!(config.shard_count, 256);
        assert!(!config.write_through);
        assert_eq!(config.compression.workers, 32);
        assert_eq!(config.promotion.workers, 16);
    }

    #[test]
    fn test_config_validation() {
        let bad = [
            CacheConfig {
                shard_count: 0,
                ..Default::default()
            },
            CacheConfig {
                promotion: PromotionConfig {
                    workers: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            CacheConfig {
                promotion: PromotionConfig {
                    queue_capacity: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            CacheConfig {
                compression: CompressionConfig {
                    workers: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            CacheConfig {
                placement: PlacementPolicy::new(2048, 1024),
                ..Default::default()
            },
            CacheConfig {
                l1: L1Config { capacity_bytes: 10 },
                ..Default::default()
            },
        ];
        for config in bad {
            assert_matches!(config.validate(), Err(Error::Config(_)));
        }
    }

    #[test]
    fn test_config_from_yaml_partial() {
        let yaml = r#"
shard_count: 16
write_through: true
l2:
  ttl_ms: 5000
compression:
  algorithm: lz4
  threshold_bytes: 1024
placement:
  l1_max_object_size: 4096
"#;
        let config = CacheConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.shard_count, 16);
        assert!(config.write_through);
        assert_eq!(config.l2.ttl(), Some(Duration::from_secs(5)));
        assert_eq!(config.l2.capacity_bytes, L2Config::default().capacity_bytes);
        assert_eq!(
            config.compression.algorithm,
            crate::cache::CompressionAlgorithm::Lz4
        );
        assert_eq!(config.placement.l1_max_object_size, 4096);
        assert_eq!(
            config.placement.l2_max_object_size,
            PlacementPolicy::default().l2_max_object_size
        );
    }

    #[test]
    fn test_config_from_yaml_rejects_invalid() {
        assert_matches!(
            CacheConfig::from_yaml_str("shard_count: 0"),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheConfig::from_yaml_str("shard_count: [nope"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_config_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        std::fs::write(&path, "shard_count: 8\nprefetch:\n  enabled: true\n").unwrap();

        let config = CacheConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.shard_count, 8);
        assert!(config.prefetch.enabled);

        let missing = CacheConfig::from_yaml_file(dir.path().join("missing.yaml"));
        assert_matches!(missing, Err(Error::Io(_)));
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = CacheManager::new(
            CacheConfig::default(),
            Arc::new(InMemoryColdStore::new()),
        );
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (manager, _) = make_manager(small_config());
        let tier = manager
            .set("k", Bytes::from_static(b"hello"), HashMap::new())
            .await
            .unwrap();

        assert_eq!(tier, CacheTier::L1);
        assert_eq!(
            manager.get("k").await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
        assert_eq!(manager.stats().l1_hits, 1);
    }

    #[tokio::test]
    async fn test_miss_is_none() {
        let (manager, _) = make_manager(small_config());
        assert_eq!(manager.get("absent").await.unwrap(), None);
        assert_eq!(manager.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_capacity_exceeded_for_oversized_local_object() {
        let mut config = small_config();
        // 4 shards of 16KB in L1 with objects up to 32KB routed there
        config.placement = PlacementPolicy::new(32 * 1024, 64 * 1024);
        let (manager, _) = make_manager(config);

        let err = manager
            .set("big", vec![0u8; 20 * 1024], HashMap::new())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::CapacityExceeded {
                tier: CacheTier::L1,
                size: 20480,
                budget: 16384,
                ..
            }
        );
        assert_eq!(manager.stats().set_failures, 1);
    }

    #[tokio::test]
    async fn test_replacing_across_tiers_removes_stale_copy() {
        let (manager, cold) = make_manager(small_config());

        manager
            .set("k", vec![1u8; 4096], HashMap::new())
            .await
            .unwrap();
        assert!(manager.l2().contains("k"));

        manager
            .set("k", vec![2u8; 16], HashMap::new())
            .await
            .unwrap();
        assert!(manager.l1().contains("k"));
        assert!(!manager.l2().contains("k"));

        manager
            .set("k", vec![3u8; 32 * 1024], HashMap::new())
            .await
            .unwrap();
        assert!(!manager.contains("k"));
        assert!(cold.contains("k"));
        assert_eq!(
            manager.get("k").await.unwrap().unwrap(),
            Bytes::from(vec![3u8; 32 * 1024])
        );
    }

    #[tokio::test]
    async fn test_write_through_persists_local_objects() {
        let mut config = small_config();
        config.write_through = true;
        let (manager, cold) = make_manager(config);

        manager
            .set("k", vec![7u8; 100], HashMap::new())
            .await
            .unwrap();
        assert!(manager.l1().contains("k"));
        assert!(cold.contains("k"));

        cold.set_fail_writes(true);
        assert_matches!(
            manager.set("k2", vec![7u8; 100], HashMap::new()).await,
            Err(Error::ColdStore { .. })
        );
        assert!(!manager.contains("k2"));
    }

    fn promotion(key: &str, byte: u8, observed: u64, destination: CacheTier) -> PromotionTask {
        PromotionTask {
            key: key.to_string(),
            payload: Payload::Raw(vec![byte; 4096]),
            size: 4096,
            metadata: HashMap::new(),
            destination,
            observed,
        }
    }

    #[tokio::test]
    async fn test_promotion_read_before_write_is_discarded() {
        let (manager, _) = make_manager(small_config());
        manager.set("k", vec![1u8; 4096], HashMap::new()).await.unwrap();

        let before_write = access_stamp();
        manager.set("k", vec![2u8; 4096], HashMap::new()).await.unwrap();

        let applied = manager
            .core
            .apply_promotion(promotion("k", 1, before_write, CacheTier::L1))
            .unwrap();
        assert!(!applied);
        assert!(!manager.l1().contains("k"));

        let after_write = access_stamp();
        let applied = manager
            .core
            .apply_promotion(promotion("k", 2, after_write, CacheTier::L1))
            .unwrap();
        assert!(applied);
        assert!(manager.l1().contains("k"));
    }

    #[tokio::test]
    async fn test_promotion_read_before_invalidate_is_discarded() {
        let (manager, _) = make_manager(small_config());
        manager.set("k", vec![1u8; 4096], HashMap::new()).await.unwrap();

        let before = access_stamp();
        manager.invalidate("k").await.unwrap();

        let applied = manager
            .core
            .apply_promotion(promotion("k", 1, before, CacheTier::L2))
            .unwrap();
        assert!(!applied);
        assert!(!manager.contains("k"));
    }

    #[tokio::test]
    async fn test_promotion_read_before_clear_is_discarded() {
        let (manager, _) = make_manager(small_config());
        let before = access_stamp();
        manager.clear();

        let applied = manager
            .core
            .apply_promotion(promotion("other", 1, before, CacheTier::L1))
            .unwrap();
        assert!(!applied);
        assert!(!manager.contains("other"));
    }

    #[tokio::test]
    async fn test_promotion_into_cold_store_rejected() {
        let (manager, _) = make_manager(small_config());
        let result = manager
            .core
            .apply_promotion(promotion("k", 1, access_stamp(), CacheTier::L3));
        assert_matches!(result, Err(Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (manager, _) = make_manager(small_config());
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(manager.is_shutdown());
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn test_batch_report_result() {
        let mut report = BatchSetReport::default();
        report.stored.insert("a".into(), CacheTier::L1);
        assert!(report.is_complete());
        assert!(report.first_error().is_none());

        report.failed.push(("b".into(), Error::Internal("first".into())));
        report.failed.push(("c".into(), Error::Internal("second".into())));
        assert_matches!(report.first_error(), Some(Error::Internal(m)) if m == "first");
        assert_matches!(report.into_result(), Err(Error::Internal(m)) if m == "first");

        let cancelled = BatchSetReport {
            abandoned: vec!["z".into()],
            ..Default::default()
        };
        assert_matches!(cancelled.into_result(), Err(Error::Cancelled(_)));
    }
}
