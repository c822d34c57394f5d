//! metricpipe Observability
//!
//! Prometheus metrics shared by the ingestor and collector services, plus a
//! small axum exporter that serves them on `/metrics`.
//!
//! # Usage
//!
//! ```no_run
//! use metricpipe_observability::{exporter, metrics};
//!
//! metrics::init();
//! metrics::INGESTOR_POLLS_TOTAL.with_label_values(&["200"]).inc();
//!
//! let metrics_router = exporter::router();
//! ```

pub mod exporter;
pub mod metrics;

pub use exporter::spawn_metrics_server;
pub use metrics::REGISTRY;

/// Initialize all observability components
pub fn init() {
    metrics::init();
}
