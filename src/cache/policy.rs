//! Tier Placement Policy
//!
//! Decides which tier a new object lands in, purely from its size.

use serde::{Deserialize, Serialize};

use super::entry::CacheTier;
use super::{DEFAULT_L1_MAX_OBJECT_SIZE, DEFAULT_L2_MAX_OBJECT_SIZE};
use crate::error::{Error, Result};

/// Size thresholds for tier placement
///
/// `size < l1_max_object_size` goes to L1, `size < l2_max_object_size` to L2,
/// anything larger straight to the cold store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementPolicy {
    pub l1_max_object_size: u64,
    pub l2_max_object_size: u64,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            l1_max_object_size: DEFAULT_L1_MAX_OBJECT_SIZE,
            l2_max_object_size: DEFAULT_L2_MAX_OBJECT_SIZE,
        }
    }
}

impl PlacementPolicy {
    pub fn new(l1_max_object_size: u64, l2_max_object_size: u64) -> Self {
        Self {
            l1_max_object_size,
            l2_max_object_size,
        }
    }

    /// Tier for an object of `size` bytes
    #[inline]
    pub fn target_tier(&self, size: u64) -> CacheTier {
        if size < self.l1_max_object_size {
            CacheTier::L1
        } else if size < self.l2_max_object_size {
            CacheTier::L2
        } else {
            CacheTier::L3
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.l1_max_object_size > self.l2_max_object_size {
            return Err(Error::Config(format!(
                "placement thresholds out of order: l1_max_object_size {} > l2_max_object_size {}",
                self.l1_max_object_size, self.l2_max_object_size
            )));
        }
        Ok(())
    }
}
