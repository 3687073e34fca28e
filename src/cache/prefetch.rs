//! Prefetch hook
//!
//! After an L1 hit the manager may hand the key to a [`Prefetcher`], which
//! can warm related objects. The call is spawned and never awaited by the
//! reader.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prefetch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Trigger the prefetcher on L1 hits
    pub enabled: bool,
    /// How many related objects an implementation may look ahead
    pub distance: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            distance: 4,
        }
    }
}

/// Fire-and-forget prefetch strategy
#[async_trait]
pub trait Prefetcher: Send + Sync {
    /// Called with the key of an L1 hit
    async fn trigger_prefetch(&self, key: &str);
}

/// Prefetcher that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPrefetcher;

#[async_trait]
impl Prefetcher for NoopPrefetcher {
    async fn trigger_prefetch(&self, _key: &str) {}
}
