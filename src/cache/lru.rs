//! LRU tracker
//!
//! Orders a shard's keys by access stamp. Hits only touch the entry's atomic
//! stamp under the shard's read lock, so the tracker can lag behind; it is
//! reconciled lazily when a victim is requested under the write lock.

use std::collections::{BTreeMap, HashMap};

/// Per-shard recency index
#[derive(Debug, Default)]
pub struct LruTracker {
    /// stamp -> key, oldest first
    order: BTreeMap<u64, String>,
    /// key -> stamp currently filed in `order`
    stamps: HashMap<String, u64>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `key` at `stamp`, replacing any previous position
    pub fn track(&mut self, key: &str, stamp: u64) {
        if let Some(old) = self.stamps.insert(key.to_string(), stamp) {
            self.order.remove(&old);
        }
        self.order.insert(stamp, key.to_string());
    }

    /// Stop tracking `key`
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    /// Remove and return the least recently used key
    ///
    /// `live` reports an entry's current stamp, or `None` if the key is gone.
    /// Keys touched since they were filed are re-filed at their live stamp
    /// and the scan continues, so the result is exact as long as live stamps
    /// cannot change during the call.
    pub fn pop_lru(&mut self, live: impl Fn(&str) -> Option<u64>) -> Option<String> {
        loop {
            let (&filed, key) = self.order.iter().next()?;
            match live(key) {
                Some(current) if current == filed => {
                    let key = key.clone();
                    self.order.remove(&filed);
                    self.stamps.remove(&key);
                    return Some(key);
                }
                Some(current) => {
                    let key = key.clone();
                    self.order.remove(&filed);
                    self.order.insert(current, key.clone());
                    self.stamps.insert(key, current);
                }
                None => {
                    let key = key.clone();
                    self.order.remove(&filed);
                    self.stamps.remove(&key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.stamps.clear();
    }
}
