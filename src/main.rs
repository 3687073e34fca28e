//! TierCache demo
//!
//! Runs a synthetic read-mostly workload against a cache manager backed by an
//! in-memory cold store, logging statistics periodically and serving them to
//! Prometheus.
//!
//! ```text
//! ┌────────────┐   get/set   ┌───────────────┐   scrape   ┌────────────┐
//! │  Clients   │────────────▶│ Cache Manager │◀───────────│  /metrics  │
//! │ (N tasks)  │             │  L1 / L2 / L3 │            │  (hyper)   │
//! └────────────┘             └───────────────┘            └────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{CacheConfig, CacheManager, InMemoryColdStore};
use tiercache::monitoring::{serve_metrics, PrometheusExporter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// TierCache - multi-tier sharded object cache demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML cache configuration; defaults are used when omitted
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// How long to run the workload, in seconds
    #[arg(long, env = "WORKLOAD_DURATION_SECONDS", default_value = "30")]
    duration_seconds: u64,

    /// Number of concurrent clients
    #[arg(long, env = "WORKLOAD_CLIENTS", default_value = "8")]
    clients: usize,

    /// Size of the key space
    #[arg(long, env = "WORKLOAD_KEYS", default_value = "10000")]
    keys: u64,

    /// Percentage of operations that are reads
    #[arg(long, env = "WORKLOAD_READ_PERCENT", default_value = "80")]
    read_percent: u64,

    /// Statistics log interval in seconds
    #[arg(long, env = "STATS_INTERVAL_SECONDS", default_value = "10")]
    stats_interval_seconds: u64,

    /// Deadline for draining background workers on exit, in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECONDS", default_value = "5")]
    shutdown_timeout_seconds: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting TierCache {}", tiercache::VERSION);

    let config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    info!("  Shards: {}", config.shard_count);
    info!("  L1 capacity: {} bytes", config.l1.capacity_bytes);
    info!("  L2 capacity: {} bytes", config.l2.capacity_bytes);
    info!("  Compression: {}", config.compression.algorithm);
    info!("  Write-through: {}", config.write_through);

    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address '{}'", args.metrics_addr))?;

    let cold = Arc::new(InMemoryColdStore::new());
    let manager = CacheManager::new(config, cold.clone()).context("failed to start cache")?;
    let shutdown = CancellationToken::new();

    // Start metrics server
    let exporter = Arc::new(PrometheusExporter::new().context("failed to build exporter")?);
    let metrics_handle = tokio::spawn(serve_metrics(
        metrics_addr,
        exporter,
        manager.clone(),
        shutdown.clone(),
    ));

    // Periodic statistics
    let reporter = tokio::spawn(report_stats(
        manager.clone(),
        Duration::from_secs(args.stats_interval_seconds.max(1)),
        shutdown.clone(),
    ));

    // Workload
    let workload = Workload {
        keys: args.keys.max(1),
        read_percent: args.read_percent.min(100),
    };
    let clients: Vec<_> = (0..args.clients.max(1))
        .map(|id| tokio::spawn(run_client(id, workload, manager.clone(), shutdown.clone())))
        .collect();

    info!(
        clients = clients.len(),
        keys = workload.keys,
        duration_s = args.duration_seconds,
        "Workload running"
    );

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_seconds)) => {
            info!("Workload duration elapsed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping workload");
        }
    }
    shutdown.cancel();

    let mut total = ClientReport::default();
    for joined in futures::future::join_all(clients).await {
        match joined {
            Ok(report) => total.merge(report),
            Err(e) => error!("Client task failed: {}", e),
        }
    }
    let _ = reporter.await;
    match metrics_handle.await {
        Ok(Err(e)) => error!("Metrics server error: {}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    let stats = manager.stats();
    info!(
        operations = total.operations,
        errors = total.errors,
        hit_ratio = stats.hit_ratio,
        cold_objects = cold.len(),
        "Workload finished"
    );
    log_stats(&manager);

    manager
        .shutdown(Duration::from_secs(args.shutdown_timeout_seconds))
        .await
        .context("cache shutdown")?;

    info!("TierCache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Statistics
// =============================================================================

async fn report_stats(manager: CacheManager, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => log_stats(&manager),
        }
    }
}

fn log_stats(manager: &CacheManager) {
    match serde_json::to_string(&manager.stats()) {
        Ok(json) => info!(stats = %json, "Cache statistics"),
        Err(e) => warn!("Failed to serialize statistics: {}", e),
    }
}

// =============================================================================
// Synthetic Workload
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Workload {
    keys: u64,
    read_percent: u64,
}

impl Workload {
    /// Most keys are small L1 objects; a few land in L2 or need compression
    fn object_size(key: u64) -> usize {
        match key % 100 {
            0 => 2 * 1024 * 1024,
            1..=9 => 256 * 1024,
            _ => 4 * 1024 + (key % 16) as usize * 1024,
        }
    }

    /// Deterministic, moderately compressible payload
    fn payload(key: u64) -> Vec<u8> {
        (0..Self::object_size(key))
            .map(|i| ((i / 64) as u64 ^ key) as u8)
            .collect()
    }
}

#[derive(Debug, Default)]
struct ClientReport {
    operations: u64,
    errors: u64,
}

impl ClientReport {
    fn merge(&mut self, other: ClientReport) {
        self.operations += other.operations;
        self.errors += other.errors;
    }
}

/// xorshift64*; seeded per client so runs are repeatable
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Skewed towards low keys so the hot set stays small
    fn skewed(&mut self, bound: u64) -> u64 {
        let unit = (self.next() >> 11) as f64 / (1u64 << 53) as f64;
        ((unit * unit) * bound as f64) as u64 % bound
    }
}

async fn run_client(
    id: usize,
    workload: Workload,
    manager: CacheManager,
    cancel: CancellationToken,
) -> ClientReport {
    let mut rng = XorShift::new(0x9E37_79B9_7F4A_7C15 ^ id as u64);
    let mut report = ClientReport::default();

    while !cancel.is_cancelled() {
        let key_id = rng.skewed(workload.keys);
        let key = format!("object-{:08}", key_id);

        let ok = if rng.next() % 100 < workload.read_percent {
            match manager.get(&key).await {
                Ok(Some(_)) => true,
                // Read-through: populate on miss
                Ok(None) => store(&manager, &key, key_id).await,
                Err(e) => {
                    warn!(key = %key, error = %e, "Get failed");
                    false
                }
            }
        } else {
            store(&manager, &key, key_id).await
        };

        report.operations += 1;
        if !ok {
            report.errors += 1;
        }
        if report.operations % 256 == 0 {
            tokio::task::yield_now().await;
        }
    }
    report
}

async fn store(manager: &CacheManager, key: &str, key_id: u64) -> bool {
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), "workload".to_string());
    match manager.set(key, Workload::payload(key_id), metadata).await {
        Ok(_) => true,
        Err(e) => {
            warn!(key = %key, error = %e, "Set failed");
            false
        }
    }
}
