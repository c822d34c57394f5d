//! Where the ingestor reads metrics from.

pub mod http;

pub use http::HttpMetricSource;
