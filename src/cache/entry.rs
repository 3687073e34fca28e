//! Cache Entry Types
//!
//! Entry records shared by every local tier, plus the monotonic access clock
//! used for LRU ordering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::compression::{self, CompressionAlgorithm};
use super::pool::BufferPool;
use crate::error::Result;

// =============================================================================
// Tier Identifier
// =============================================================================

/// Cache tier identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// L1 - RAM (hot)
    L1,
    /// L2 - NVMe (warm)
    L2,
    /// L3 - Cold storage
    L3,
}

impl CacheTier {
    /// Short label used in metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::L3 => "l3",
        }
    }

    /// The tier a hit in this tier should be promoted to
    pub fn promotion_target(&self) -> Option<CacheTier> {
        match self {
            CacheTier::L1 => None,
            CacheTier::L2 => Some(CacheTier::L1),
            CacheTier::L3 => Some(CacheTier::L2),
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (RAM)"),
            CacheTier::L2 => write!(f, "L2 (NVMe)"),
            CacheTier::L3 => write!(f, "L3 (Cold)"),
        }
    }
}

// =============================================================================
// Access Clock
// =============================================================================

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Strictly increasing access stamp (nanoseconds since process start)
///
/// Two calls never return the same value, even from different threads, so
/// stamps give a total order over accesses.
pub fn access_stamp() -> u64 {
    let now = EPOCH.elapsed().as_nanos() as u64;
    let prev = LAST_STAMP
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(prev + 1)
}

// =============================================================================
// Payload
// =============================================================================

/// Stored representation of an object: exactly one of raw or compressed bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Uncompressed bytes
    Raw(Vec<u8>),
    /// Compressed form of the raw bytes
    Compressed {
        data: Vec<u8>,
        algorithm: CompressionAlgorithm,
    },
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Raw(Vec::new())
    }
}

impl Payload {
    /// Bytes actually held in memory
    pub fn stored_len(&self) -> usize {
        match self {
            Payload::Raw(data) => data.len(),
            Payload::Compressed { data, .. } => data.len(),
        }
    }

    /// Algorithm of the stored bytes (`None` for raw)
    pub fn algorithm(&self) -> CompressionAlgorithm {
        match self {
            Payload::Raw(_) => CompressionAlgorithm::None,
            Payload::Compressed { algorithm, .. } => *algorithm,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Payload::Compressed { .. })
    }

    /// Stored bytes, as held
    pub fn stored(&self) -> &[u8] {
        match self {
            Payload::Raw(data) => data,
            Payload::Compressed { data, .. } => data,
        }
    }

    /// Decode to the original raw bytes
    pub fn decode(&self) -> Result<Bytes> {
        match self {
            Payload::Raw(data) => Ok(Bytes::copy_from_slice(data)),
            Payload::Compressed { data, algorithm } => {
                compression::decompress(data, *algorithm).map(Bytes::from)
            }
        }
    }

    /// Copy into a buffer checked out from `pool`
    pub(crate) fn copy_with(&self, pool: &BufferPool) -> Payload {
        let mut buf = pool.checkout(self.stored_len());
        buf.extend_from_slice(self.stored());
        match self {
            Payload::Raw(_) => Payload::Raw(buf),
            Payload::Compressed { algorithm, .. } => Payload::Compressed {
                data: buf,
                algorithm: *algorithm,
            },
        }
    }

    pub(crate) fn into_buffer(self) -> Vec<u8> {
        match self {
            Payload::Raw(data) => data,
            Payload::Compressed { data, .. } => data,
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached object owned by exactly one shard
///
/// Records are recycled through the entry pool, so every field is reset by
/// [`CacheEntry::prepare`] before the record is reused.
pub struct CacheEntry {
    key: String,
    payload: Payload,
    /// Raw length at insertion
    size: u64,
    access_count: AtomicU64,
    last_accessed: AtomicU64,
    created_at: Instant,
    tier: CacheTier,
    metadata: HashMap<String, String>,
    ttl: Option<Duration>,
}

impl CacheEntry {
    /// Empty record, ready for `prepare`
    pub(crate) fn blank() -> Self {
        Self {
            key: String::new(),
            payload: Payload::default(),
            size: 0,
            access_count: AtomicU64::new(0),
            last_accessed: AtomicU64::new(0),
            created_at: Instant::now(),
            tier: CacheTier::L1,
            metadata: HashMap::new(),
            ttl: None,
        }
    }

    /// Fresh entry outside of any pool
    pub fn new(key: &str, payload: Payload, size: u64, tier: CacheTier) -> Self {
        let mut entry = Self::blank();
        entry.prepare(key, payload, size, tier, HashMap::new(), None);
        entry
    }

    /// Reset every field for a new object
    pub(crate) fn prepare(
        &mut self,
        key: &str,
        payload: Payload,
        size: u64,
        tier: CacheTier,
        metadata: HashMap<String, String>,
        ttl: Option<Duration>,
    ) {
        self.key.clear();
        self.key.push_str(key);
        self.payload = payload;
        self.size = size;
        self.access_count.store(0, Ordering::Relaxed);
        self.last_accessed.store(access_stamp(), Ordering::Relaxed);
        self.created_at = Instant::now();
        self.tier = tier;
        self.metadata = metadata;
        self.ttl = ttl;
    }

    /// Strip the record for pooling, handing back its payload buffer
    pub(crate) fn scrub(&mut self) -> Payload {
        self.key.clear();
        self.metadata.clear();
        self.size = 0;
        self.ttl = None;
        self.access_count.store(0, Ordering::Relaxed);
        self.last_accessed.store(0, Ordering::Relaxed);
        std::mem::take(&mut self.payload)
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Raw object size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Stored size (equal to `size` when uncompressed)
    #[inline]
    pub fn compressed_size(&self) -> u64 {
        self.payload.stored_len() as u64
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.payload.is_compressed()
    }

    #[inline]
    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    #[inline]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    #[inline]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Acquire)
    }

    /// Record a hit and return the new access count
    ///
    /// Safe under a shared lock: both fields are atomics.
    #[inline]
    pub fn record_access(&self) -> u64 {
        self.last_accessed.store(access_stamp(), Ordering::Release);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether the TTL has run out as of `now`
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) > ttl,
            None => false,
        }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Decode the stored payload back to the raw bytes
    pub fn data(&self) -> Result<Bytes> {
        self.payload.decode()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("tier", &self.tier)
            .field("size", &self.size)
            .field("compressed_size", &self.compressed_size())
            .field("access_count", &self.access_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
