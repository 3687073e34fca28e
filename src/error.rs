//! Error types for the tiered cache engine

use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheTier;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
///
/// A lookup miss is not an error: `get` returns `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Capacity Errors
    // =========================================================================
    /// An object could not be placed because its shard cannot make room
    #[error(
        "Capacity exceeded in {tier} for key '{key}': object is {size} bytes, shard budget is {budget} bytes"
    )]
    CapacityExceeded {
        tier: CacheTier,
        key: String,
        size: u64,
        budget: u64,
    },

    // =========================================================================
    // Cold Store Errors
    // =========================================================================
    /// The cold store adapter failed
    #[error("Cold store {operation} failed for key '{key}': {reason}")]
    ColdStore {
        operation: &'static str,
        key: String,
        reason: String,
    },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Background workers did not drain before the deadline
    #[error("Shutdown timed out after {deadline:?} with {pending} worker(s) still running")]
    ShutdownTimeout { deadline: Duration, pending: usize },

    /// Operation abandoned because its cancellation token fired
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Configuration / Infrastructure
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a cold store error from any displayable cause
    pub fn cold_store(operation: &'static str, key: &str, reason: impl std::fmt::Display) -> Self {
        Error::ColdStore {
            operation,
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors the caller can resolve by freeing space or rerouting the object
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::CapacityExceeded { .. })
    }
}
