//! Cache Compression Support
//!
//! zstd (default) and LZ4 compression with a bounded number of concurrent
//! compression slots. When every slot is busy the payload is stored
//! uncompressed instead of waiting.
//!
//! # Example
//!
//! ```
//! use tiercache::cache::compression::{self, CompressionAlgorithm};
//!
//! let data = b"Hello, this is test data that should compress well! Hello, this is test data.";
//! let compressed = compression::compress_with(CompressionAlgorithm::Zstd, data, 3).unwrap();
//!
//! let decompressed = compression::decompress(&compressed, CompressionAlgorithm::Zstd).unwrap();
//! assert_eq!(decompressed.as_slice(), &data[..]);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    Lz4,
    /// Zstandard - better ratio
    #[default]
    Zstd,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress at all
    pub enabled: bool,
    /// Algorithm used for new payloads
    pub algorithm: CompressionAlgorithm,
    /// Compression level (algorithm-specific)
    pub level: i32,
    /// Only payloads strictly larger than this are compressed
    pub threshold_bytes: u64,
    /// Concurrent compression slots
    pub workers: usize,
    /// Keep the compressed form only when `compressed / raw` is below this
    pub max_ratio: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgorithm::Zstd,
            level: 3,
            threshold_bytes: 64 * 1024,
            workers: 32,
            max_ratio: 0.9,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block compressor (size-prefixed blocks)
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }
}

/// Zstandard compressor
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| Error::CompressionFailed {
            algorithm: "zstd".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| Error::DecompressionFailed {
            algorithm: "zstd".into(),
            reason: e.to_string(),
        })
    }
}

/// Compress `data` with `algorithm`
///
/// `None` returns a copy of the input.
pub fn compress_with(algorithm: CompressionAlgorithm, data: &[u8], level: i32) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => Lz4Compressor::with_level(level).compress(data),
        CompressionAlgorithm::Zstd => ZstdCompressor::with_level(level).compress(data),
    }
}

/// Decompress `data` that was produced by `algorithm`
pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        // Level is irrelevant for decompression
        CompressionAlgorithm::Lz4 => Lz4Compressor::with_level(0).decompress(data),
        CompressionAlgorithm::Zstd => ZstdCompressor::with_level(0).decompress(data),
    }
}

// =============================================================================
// Compression Engine
// =============================================================================

/// Result of an opportunistic compression attempt
#[derive(Debug, PartialEq)]
pub enum CompressionOutcome {
    /// Compression disabled or payload at/below the threshold
    Skipped,
    /// Every compression slot was busy
    NoSlot,
    /// Compressed form kept
    Accepted {
        data: Vec<u8>,
        algorithm: CompressionAlgorithm,
        ratio: f64,
    },
    /// Compressed, but not small enough to be worth keeping
    Rejected { ratio: f64 },
    /// The compressor returned an error
    Failed,
}

/// Compression counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressionStatsSnapshot {
    /// Payloads that went through a compressor
    pub operations: u64,
    /// Compressed forms that were kept
    pub accepted: u64,
    /// Compressed forms discarded for a poor ratio
    pub rejected: u64,
    /// Payloads stored raw because no slot was free
    pub skipped_no_slot: u64,
    pub failures: u64,
    /// Raw bytes of accepted payloads
    pub uncompressed_bytes: u64,
    /// Compressed bytes of accepted payloads
    pub compressed_bytes: u64,
    /// Total time spent compressing
    pub time_ns: u64,
}

impl CompressionStatsSnapshot {
    /// `compressed / uncompressed` over accepted payloads (1.0 when none)
    pub fn ratio(&self) -> f64 {
        if self.uncompressed_bytes == 0 {
            1.0
        } else {
            self.compressed_bytes as f64 / self.uncompressed_bytes as f64
        }
    }
}

#[derive(Default)]
struct CompressionStats {
    operations: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    skipped_no_slot: AtomicU64,
    failures: AtomicU64,
    uncompressed_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
    time_ns: AtomicU64,
}

/// Compression with a fixed number of slots
pub struct CompressionEngine {
    config: CompressionConfig,
    compressor: Box<dyn Compressor>,
    slots: Arc<Semaphore>,
    stats: CompressionStats,
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig) -> Self {
        let compressor: Box<dyn Compressor> = match config.algorithm {
            CompressionAlgorithm::Lz4 => Box::new(Lz4Compressor::with_level(config.level)),
            // `None` is treated as "disabled" by `should_compress`
            CompressionAlgorithm::Zstd | CompressionAlgorithm::None => {
                Box::new(ZstdCompressor::with_level(config.level))
            }
        };
        Self {
            slots: Arc::new(Semaphore::new(config.workers.max(1))),
            compressor,
            config,
            stats: CompressionStats::default(),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Whether a payload of `len` bytes is eligible
    pub fn should_compress(&self, len: usize) -> bool {
        self.config.enabled
            && self.config.algorithm != CompressionAlgorithm::None
            && len as u64 > self.config.threshold_bytes
    }

    /// Free compression slots
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Compress synchronously, returning the compressed bytes and the ratio
    pub fn compress(&self, data: &[u8]) -> Result<(Vec<u8>, f64)> {
        let started = Instant::now();
        let result = self.compressor.compress(data);
        self.stats
            .time_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.stats.operations.fetch_add(1, Ordering::Relaxed);

        let compressed = result?;
        let ratio = if data.is_empty() {
            1.0
        } else {
            compressed.len() as f64 / data.len() as f64
        };
        Ok((compressed, ratio))
    }

    /// Decompress bytes produced by any supported algorithm
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        decompress(data, algorithm).map(Bytes::from)
    }

    /// Try to compress `data` on the blocking pool
    ///
    /// Never waits for a slot: if all are taken the payload stays raw.
    pub async fn maybe_compress(self: &Arc<Self>, data: &Bytes) -> CompressionOutcome {
        if !self.should_compress(data.len()) {
            return CompressionOutcome::Skipped;
        }

        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.skipped_no_slot.fetch_add(1, Ordering::Relaxed);
                return CompressionOutcome::NoSlot;
            }
        };

        let engine = Arc::clone(self);
        let input = data.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.compress(&input)
        })
        .await;

        let (compressed, ratio) = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, size = data.len(), "Compression failed, storing raw");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return CompressionOutcome::Failed;
            }
            Err(e) => {
                warn!(error = %e, "Compression task aborted, storing raw");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return CompressionOutcome::Failed;
            }
        };

        if ratio < self.config.max_ratio {
            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            self.stats
                .uncompressed_bytes
                .fetch_add(data.len() as u64, Ordering::Relaxed);
            self.stats
                .compressed_bytes
                .fetch_add(compressed.len() as u64, Ordering::Relaxed);
            CompressionOutcome::Accepted {
                data: compressed,
                algorithm: self.compressor.algorithm(),
                ratio,
            }
        } else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            CompressionOutcome::Rejected { ratio }
        }
    }

    pub fn stats(&self) -> CompressionStatsSnapshot {
        CompressionStatsSnapshot {
            operations: self.stats.operations.load(Ordering::Relaxed),
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            skipped_no_slot: self.stats.skipped_no_slot.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            uncompressed_bytes: self.stats.uncompressed_bytes.load(Ordering::Relaxed),
            compressed_bytes: self.stats.compressed_bytes.load(Ordering::Relaxed),
            time_ns: self.stats.time_ns.load(Ordering::Relaxed),
        }
    }
}
