//! Monitoring module
//!
//! Exposes cache statistics to Prometheus.

mod exporter;
mod server;

pub use exporter::PrometheusExporter;
pub use server::serve_metrics;
