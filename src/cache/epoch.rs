//! Per-key write epochs
//!
//! Keys hash onto a fixed array of stripes. Each stripe is a mutex over the
//! stamp of the last write to any of its keys. Writers change the local tiers
//! and bump the stamp while holding the stripe; promotions check the stamp
//! under the same stripe before inserting. A promotion whose source was read
//! before a write therefore never lands after that write. Keys sharing a
//! stripe only cause extra promotions to be discarded.

use parking_lot::{Mutex, MutexGuard};

use super::entry::access_stamp;
use super::shard::fnv1a_64;

/// Default number of stripes
pub(crate) const DEFAULT_EPOCH_STRIPES: usize = 1024;

pub(crate) struct WriteEpochs {
    stripes: Box<[Mutex<u64>]>,
}

impl WriteEpochs {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(0)).collect(),
        }
    }

    /// Lock the stripe owning `key`
    ///
    /// Lock order is stripe before shard; shards never take a stripe.
    pub(crate) fn lock(&self, key: &str) -> EpochGuard<'_> {
        let idx = (fnv1a_64(key.as_bytes()) % self.stripes.len() as u64) as usize;
        EpochGuard(self.stripes[idx].lock())
    }

    /// Lock every stripe, in index order
    pub(crate) fn lock_all(&self) -> Vec<EpochGuard<'_>> {
        self.stripes.iter().map(|s| EpochGuard(s.lock())).collect()
    }
}

impl Default for WriteEpochs {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCH_STRIPES)
    }
}

/// Held stripe of a [`WriteEpochs`]
pub(crate) struct EpochGuard<'a>(MutexGuard<'a, u64>);

impl EpochGuard<'_> {
    /// Whether a key on this stripe was written after `stamp` was taken
    pub(crate) fn written_since(&self, stamp: u64) -> bool {
        *self.0 > stamp
    }

    pub(crate) fn mark_written(&mut self) {
        *self.0 = access_stamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stripe_is_unwritten() {
        let epochs = WriteEpochs::default();
        assert!(!epochs.lock("k").written_since(0));
    }

    #[test]
    fn test_write_after_observation_is_detected() {
        let epochs = WriteEpochs::default();
        let observed = access_stamp();

        epochs.lock("k").mark_written();
        assert!(epochs.lock("k").written_since(observed));

        // Observations taken after the write are current
        let later = access_stamp();
        assert!(!epochs.lock("k").written_since(later));
    }

    #[test]
    fn test_single_stripe_shares_epoch() {
        let epochs = WriteEpochs::new(1);
        let observed = access_stamp();
        epochs.lock("a").mark_written();
        assert!(epochs.lock("b").written_since(observed));
    }

    #[test]
    fn test_lock_all_marks_every_stripe() {
        let epochs = WriteEpochs::new(8);
        let observed = access_stamp();
        for mut guard in epochs.lock_all() {
            guard.mark_written();
        }
        for key in ["a", "b", "c", "d"] {
            assert!(epochs.lock(key).written_since(observed));
        }
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let epochs = WriteEpochs::new(0);
        epochs.lock("anything").mark_written();
        assert!(epochs.lock("other").written_since(0));
    }
}
