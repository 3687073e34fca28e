//! Prometheus exporter for cache statistics
//!
//! The exporter owns its own [`Registry`] and mirrors a
//! [`CacheStatsSnapshot`] into it on every `update`. Cumulative stats are
//! exposed as counters, occupancy and ratios as gauges.

use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::cache::CacheStatsSnapshot;
use crate::error::{Error, Result};

const NAMESPACE: &str = "tiercache";

/// Cache metrics in Prometheus text format
pub struct PrometheusExporter {
    registry: Registry,
    hits: IntCounterVec,
    misses: IntCounter,
    evictions: IntCounter,
    expirations: IntCounter,
    sets: IntCounter,
    set_failures: IntCounter,
    promotions: IntCounterVec,
    cold_errors: IntCounterVec,
    compressed_bytes: IntCounterVec,
    tier_bytes: IntGaugeVec,
    tier_entries: IntGaugeVec,
    hit_ratio: Gauge,
    compression_ratio: Gauge,
    get_latency: GaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let hits = IntCounterVec::new(
            opts("hits_total", "Cache hits by serving tier"),
            &["tier"],
        )?;
        let misses = IntCounter::with_opts(opts("misses_total", "Lookups missed in every tier"))?;
        let evictions = IntCounter::with_opts(opts(
            "evictions_total",
            "Entries evicted to make room in L1 or L2",
        ))?;
        let expirations =
            IntCounter::with_opts(opts("expirations_total", "L2 entries dropped for TTL"))?;
        let sets = IntCounter::with_opts(opts("sets_total", "Successful set operations"))?;
        let set_failures = IntCounter::with_opts(opts("set_failures_total", "Failed set operations"))?;
        let promotions = IntCounterVec::new(
            opts("promotions_total", "Promotion tasks by outcome"),
            &["outcome"],
        )?;
        let cold_errors = IntCounterVec::new(
            opts("cold_store_errors_total", "Cold store adapter failures"),
            &["operation"],
        )?;
        let compressed_bytes = IntCounterVec::new(
            opts(
                "compression_bytes_total",
                "Bytes fed to and produced by accepted compressions",
            ),
            &["direction"],
        )?;
        let tier_bytes = IntGaugeVec::new(opts("tier_bytes", "Raw bytes held per tier"), &["tier"])?;
        let tier_entries =
            IntGaugeVec::new(opts("tier_entries", "Entries held per tier"), &["tier"])?;
        let hit_ratio = Gauge::with_opts(opts("hit_ratio", "Hits over total lookups"))?;
        let compression_ratio = Gauge::with_opts(opts(
            "compression_ratio",
            "Compressed over uncompressed bytes for accepted payloads",
        ))?;
        let get_latency = GaugeVec::new(
            opts("get_latency_microseconds", "Get latency summary"),
            &["quantile"],
        )?;

        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(misses.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(expirations.clone()))?;
        registry.register(Box::new(sets.clone()))?;
        registry.register(Box::new(set_failures.clone()))?;
        registry.register(Box::new(promotions.clone()))?;
        registry.register(Box::new(cold_errors.clone()))?;
        registry.register(Box::new(compressed_bytes.clone()))?;
        registry.register(Box::new(tier_bytes.clone()))?;
        registry.register(Box::new(tier_entries.clone()))?;
        registry.register(Box::new(hit_ratio.clone()))?;
        registry.register(Box::new(compression_ratio.clone()))?;
        registry.register(Box::new(get_latency.clone()))?;

        Ok(Self {
            registry,
            hits,
            misses,
            evictions,
            expirations,
            sets,
            set_failures,
            promotions,
            cold_errors,
            compressed_bytes,
            tier_bytes,
            tier_entries,
            hit_ratio,
            compression_ratio,
            get_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mirror a snapshot into the registry
    pub fn update(&self, stats: &CacheStatsSnapshot) {
        advance(&self.hits.with_label_values(&["l1"]), stats.l1_hits);
        advance(&self.hits.with_label_values(&["l2"]), stats.l2_hits);
        advance(&self.hits.with_label_values(&["l3"]), stats.l3_hits);
        advance(&self.misses, stats.misses);
        advance(&self.evictions, stats.evictions);
        advance(&self.expirations, stats.expirations);
        advance(&self.sets, stats.sets);
        advance(&self.set_failures, stats.set_failures);

        for (outcome, value) in [
            ("enqueued", stats.promotions_enqueued),
            ("completed", stats.promotions_completed),
            ("dropped", stats.promotions_dropped),
            ("failed", stats.promotions_failed),
        ] {
            advance(&self.promotions.with_label_values(&[outcome]), value);
        }
        advance(
            &self.cold_errors.with_label_values(&["read"]),
            stats.cold_read_errors,
        );
        advance(
            &self.cold_errors.with_label_values(&["write"]),
            stats.cold_write_errors,
        );
        advance(
            &self.compressed_bytes.with_label_values(&["in"]),
            stats.compression.uncompressed_bytes,
        );
        advance(
            &self.compressed_bytes.with_label_values(&["out"]),
            stats.compression.compressed_bytes,
        );

        self.tier_bytes
            .with_label_values(&["l1"])
            .set(saturating_i64(stats.l1_bytes));
        self.tier_bytes
            .with_label_values(&["l2"])
            .set(saturating_i64(stats.l2_bytes));
        self.tier_entries
            .with_label_values(&["l1"])
            .set(saturating_i64(stats.l1_entries));
        self.tier_entries
            .with_label_values(&["l2"])
            .set(saturating_i64(stats.l2_entries));

        self.hit_ratio.set(stats.hit_ratio);
        self.compression_ratio.set(stats.compression_ratio);
        self.get_latency
            .with_label_values(&["0.5"])
            .set(stats.p50_latency_us as f64);
        self.get_latency
            .with_label_values(&["0.99"])
            .set(stats.p99_latency_us as f64);
        self.get_latency
            .with_label_values(&["avg"])
            .set(stats.avg_latency_us);
    }

    /// Render the registry in the text exposition format
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("metrics output is not UTF-8: {}", e)))
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

/// Move a counter forward to `value`; counters never go back
fn advance(counter: &IntCounter, value: u64) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
