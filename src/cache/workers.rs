//! Background workers
//!
//! - A fixed pool of promotion workers draining a bounded queue
//! - A periodic TTL sweeper for L2
//!
//! Both stop as soon as the shared cancellation token fires. Promotions still
//! queued at that point are discarded and their buffers returned to the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::entry::{CacheEntry, CacheTier, Payload};
use super::l3::ColdObject;
use super::manager::Core;
use super::pool::BufferPool;
use crate::error::{Error, Result};

/// Promotion pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Number of promotion workers
    pub workers: usize,
    /// Bounded queue capacity; enqueues beyond it are dropped
    pub queue_capacity: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 1000,
        }
    }
}

/// A copy of an object headed for a faster tier
#[derive(Debug)]
pub struct PromotionTask {
    pub key: String,
    pub payload: Payload,
    /// Raw object size
    pub size: u64,
    pub metadata: HashMap<String, String>,
    pub destination: CacheTier,
    /// Access stamp taken before the source tier was read
    pub observed: u64,
}

impl PromotionTask {
    /// Copy a local entry into pooled buffers
    pub(crate) fn from_entry(
        entry: &CacheEntry,
        destination: CacheTier,
        observed: u64,
        buffers: &BufferPool,
    ) -> Self {
        Self {
            key: entry.key().to_string(),
            payload: entry.payload().copy_with(buffers),
            size: entry.size(),
            metadata: entry.metadata().clone(),
            destination,
            observed,
        }
    }

    /// Copy a cold store object into pooled buffers, keeping its encoding
    pub(crate) fn from_cold(
        key: &str,
        object: &ColdObject,
        destination: CacheTier,
        observed: u64,
        buffers: &BufferPool,
    ) -> Self {
        let mut buf = buffers.checkout(object.data.len());
        buf.extend_from_slice(&object.data);
        let payload = match object.algorithm {
            super::CompressionAlgorithm::None => Payload::Raw(buf),
            algorithm => Payload::Compressed {
                data: buf,
                algorithm,
            },
        };
        Self {
            key: key.to_string(),
            payload,
            size: object.size,
            metadata: object.metadata.clone(),
            destination,
            observed,
        }
    }
}

/// Spawn `count` promotion workers sharing one receiver
pub(crate) fn spawn_promotion_workers(
    core: Arc<Core>,
    rx: mpsc::Receiver<PromotionTask>,
    count: usize,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count)
        .map(|id| {
            tokio::spawn(promotion_worker(
                id,
                Arc::clone(&core),
                Arc::clone(&rx),
                cancel.clone(),
            ))
        })
        .collect()
}

async fn promotion_worker(
    id: usize,
    core: Arc<Core>,
    rx: Arc<Mutex<mpsc::Receiver<PromotionTask>>>,
    cancel: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                discard_queued(id, &core, &rx).await;
                break;
            }
            task = async { rx.lock().await.recv().await } => task,
        };
        let Some(task) = task else { break };

        let key = task.key.clone();
        let destination = task.destination;
        match core.apply_promotion(task) {
            Ok(true) => {
                core.stats.record_promotion_completed();
                trace!(worker = id, key = %key, tier = %destination, "Promoted entry");
            }
            Ok(false) => {
                core.stats.record_promotion_dropped();
                trace!(worker = id, key = %key, tier = %destination, "Discarded stale promotion");
            }
            Err(e) => {
                core.stats.record_promotion_failed();
                debug!(worker = id, key = %key, tier = %destination, error = %e, "Promotion failed");
            }
        }
    }
    trace!(worker = id, "Promotion worker stopped");
}

/// Close the queue and return the buffers of everything still in it
async fn discard_queued(
    id: usize,
    core: &Core,
    rx: &Mutex<mpsc::Receiver<PromotionTask>>,
) {
    let mut rx = rx.lock().await;
    rx.close();
    let mut discarded = 0usize;
    while let Ok(task) = rx.try_recv() {
        core.pools.buffers.release(task.payload.into_buffer());
        core.stats.record_promotion_dropped();
        discarded += 1;
    }
    if discarded > 0 {
        debug!(worker = id, discarded, "Discarded queued promotions on shutdown");
    }
}

/// Spawn the periodic L2 expiry sweep
pub(crate) fn spawn_ttl_sweeper(
    core: Arc<Core>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = core.l2.drain_expired();
                    if removed > 0 {
                        debug!(removed, "Swept expired L2 entries");
                    }
                }
            }
        }
        trace!("TTL sweeper stopped");
    })
}

/// Await every handle, giving up at `deadline`
///
/// On timeout the stragglers are aborted and reported in the error.
pub(crate) async fn join_with_deadline(
    mut handles: Vec<JoinHandle<()>>,
    deadline: Duration,
) -> Result<()> {
    let joined = tokio::time::timeout(deadline, async {
        for handle in handles.iter_mut() {
            // A panicked worker has stopped either way
            let _ = handle.await;
        }
    })
    .await;

    if joined.is_ok() {
        return Ok(());
    }

    let pending = handles.iter().filter(|h| !h.is_finished()).count();
    for handle in &handles {
        handle.abort();
    }
    if pending == 0 {
        Ok(())
    } else {
        Err(Error::ShutdownTimeout { deadline, pending })
    }
}
