//! Entry and buffer pools
//!
//! Bounded lock-free free lists (`crossbeam::queue::ArrayQueue`) for entry
//! records and payload buffers. Buffers come in three size classes; anything
//! larger than the biggest class is allocated exactly and never pooled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use serde::Serialize;

use super::entry::CacheEntry;

/// Pooled buffer capacities: 32KB, 256KB, 2MB
pub const BUFFER_SIZE_CLASSES: [usize; 3] = [32 * 1024, 256 * 1024, 2 * 1024 * 1024];

/// Default number of idle records kept in the entry pool
pub const DEFAULT_ENTRY_POOL_CAPACITY: usize = 4096;

/// Default number of idle buffers kept per size class
pub const DEFAULT_BUFFERS_PER_CLASS: usize = 64;

// =============================================================================
// Entry Pool
// =============================================================================

/// Free list of entry records
pub struct EntryPool {
    free: ArrayQueue<CacheEntry>,
    reused: AtomicU64,
    allocated: AtomicU64,
    returned: AtomicU64,
}

impl EntryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        }
    }

    /// Take a record from the pool, or allocate one
    ///
    /// The caller must `prepare` the record before publishing it.
    pub fn checkout(&self) -> CacheEntry {
        match self.free.pop() {
            Some(entry) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                entry
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                CacheEntry::blank()
            }
        }
    }

    /// Return a scrubbed record; dropped when the pool is full
    pub fn release(&self, entry: CacheEntry) {
        if self.free.push(entry).is_ok() {
            self.returned.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Idle records
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

// =============================================================================
// Buffer Pool
// =============================================================================

/// Size-classed free lists of payload buffers
pub struct BufferPool {
    classes: Vec<ArrayQueue<Vec<u8>>>,
    reused: AtomicU64,
    allocated: AtomicU64,
    returned: AtomicU64,
}

impl BufferPool {
    pub fn new(per_class: usize) -> Self {
        Self {
            classes: BUFFER_SIZE_CLASSES
                .iter()
                .map(|_| ArrayQueue::new(per_class.max(1)))
                .collect(),
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        }
    }

    /// Smallest class that can hold `len` bytes
    pub fn class_for(len: usize) -> Option<usize> {
        BUFFER_SIZE_CLASSES.iter().position(|&class| len <= class)
    }

    /// Empty buffer with capacity for at least `len` bytes
    pub fn checkout(&self, len: usize) -> Vec<u8> {
        let Some(class) = Self::class_for(len) else {
            // Oversized payloads get an exact allocation
            self.allocated.fetch_add(1, Ordering::Relaxed);
            return Vec::with_capacity(len);
        };

        match self.classes[class].pop() {
            Some(mut buf) => {
                buf.clear();
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(BUFFER_SIZE_CLASSES[class])
            }
        }
    }

    /// Return a buffer to the largest class it can serve
    ///
    /// Buffers smaller than the smallest class or larger than the largest
    /// one are dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity > BUFFER_SIZE_CLASSES[BUFFER_SIZE_CLASSES.len() - 1] {
            return;
        }
        let Some(class) = BUFFER_SIZE_CLASSES.iter().rposition(|&c| c <= capacity) else {
            return;
        };

        buf.clear();
        if self.classes[class].push(buf).is_ok() {
            self.returned.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Idle buffers in the given class
    pub fn idle(&self, class: usize) -> usize {
        self.classes.get(class).map(|q| q.len()).unwrap_or(0)
    }
}

// =============================================================================
// Combined Pools
// =============================================================================

/// Pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub entries_reused: u64,
    pub entries_allocated: u64,
    pub entries_returned: u64,
    pub entries_idle: usize,
    pub buffers_reused: u64,
    pub buffers_allocated: u64,
    pub buffers_returned: u64,
}

/// Entry and buffer pools shared by the tiers and workers
pub struct Pools {
    pub entries: EntryPool,
    pub buffers: BufferPool,
}

impl Default for Pools {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_POOL_CAPACITY, DEFAULT_BUFFERS_PER_CLASS)
    }
}

impl Pools {
    pub fn new(entry_capacity: usize, buffers_per_class: usize) -> Self {
        Self {
            entries: EntryPool::new(entry_capacity),
            buffers: BufferPool::new(buffers_per_class),
        }
    }

    /// Recycle an entry that has left its shard
    ///
    /// Readers may still hold a clone of the `Arc`; in that case the record
    /// is simply dropped once they are done.
    pub fn release_entry(&self, entry: Arc<CacheEntry>) {
        if let Ok(mut entry) = Arc::try_unwrap(entry) {
            let payload = entry.scrub();
            self.buffers.release(payload.into_buffer());
            self.entries.release(entry);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            entries_reused: self.entries.reused.load(Ordering::Relaxed),
            entries_allocated: self.entries.allocated.load(Ordering::Relaxed),
            entries_returned: self.entries.returned.load(Ordering::Relaxed),
            entries_idle: self.entries.idle(),
            buffers_reused: self.buffers.reused.load(Ordering::Relaxed),
            buffers_allocated: self.buffers.allocated.load(Ordering::Relaxed),
            buffers_returned: self.buffers.returned.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTier, Payload};
    use std::collections::HashMap;

    #[test]
    fn test_class_selection() {
        assert_eq!(BufferPool::class_for(0), Some(0));
        assert_eq!(BufferPool::class_for(32 * 1024), Some(0));
        assert_eq!(BufferPool::class_for(32 * 1024 + 1), Some(1));
        assert_eq!(BufferPool::class_for(2 * 1024 * 1024), Some(2));
        assert_eq!(BufferPool::class_for(2 * 1024 * 1024 + 1), None);
    }

    #[test]
    fn test_buffer_checkout_uses_class_capacity() {
        let pool = BufferPool::new(4);
        let buf = pool.checkout(1000);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 32 * 1024);
    }

    #[test]
    fn test_buffer_reuse() {
        let pool = BufferPool::new(4);
        let mut buf = pool.checkout(100 * 1024);
        buf.extend_from_slice(&[7u8; 1024]);
        pool.release(buf);
        assert_eq!(pool.idle(1), 1);

        let again = pool.checkout(200 * 1024);
        assert!(again.is_empty());
        assert!(again.capacity() >= 256 * 1024);
        assert_eq!(pool.idle(1), 0);
        assert_eq!(pool.reused.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_oversized_buffers_not_pooled() {
        let pool = BufferPool::new(4);
        let big = pool.checkout(3 * 1024 * 1024);
        assert!(big.capacity() >= 3 * 1024 * 1024);
        pool.release(big);

        for class in 0..BUFFER_SIZE_CLASSES.len() {
            assert_eq!(pool.idle(class), 0);
        }
    }

    #[test]
    fn test_tiny_buffers_dropped() {
        let pool = BufferPool::new(4);
        pool.release(Vec::with_capacity(16));
        assert_eq!(pool.idle(0), 0);
    }

    #[test]
    fn test_buffer_pool_bounded() {
        let pool = BufferPool::new(2);
        for _ in 0..5 {
            pool.release(Vec::with_capacity(32 * 1024));
        }
        assert_eq!(pool.idle(0), 2);
    }

    #[test]
    fn test_release_entry_recycles_record_and_buffer() {
        let pools = Pools::new(8, 8);
        let mut buf = pools.buffers.checkout(10);
        buf.extend_from_slice(b"0123456789");

        let mut entry = pools.entries.checkout();
        entry.prepare(
            "k",
            Payload::Raw(buf),
            10,
            CacheTier::L1,
            HashMap::new(),
            None,
        );
        pools.release_entry(Arc::new(entry));

        let stats = pools.stats();
        assert_eq!(stats.entries_returned, 1);
        assert_eq!(stats.buffers_returned, 1);
        assert_eq!(stats.entries_idle, 1);

        let reused = pools.entries.checkout();
        assert_eq!(reused.key(), "");
        assert_eq!(reused.size(), 0);
        assert_eq!(pools.stats().entries_reused, 1);
    }

    #[test]
    fn test_release_shared_entry_is_dropped() {
        let pools = Pools::new(8, 8);
        let entry = Arc::new(CacheEntry::new(
            "k",
            Payload::Raw(vec![0; 4]),
            4,
            CacheTier::L1,
        ));
        let reader = Arc::clone(&entry);

        pools.release_entry(entry);
        assert_eq!(pools.stats().entries_returned, 0);
        assert_eq!(reader.key(), "k");
    }
}
