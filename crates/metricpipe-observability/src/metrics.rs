use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Broker Metrics
    // ============================================================================

    /// Metadata probes sent while waiting for the broker, by outcome
    pub static ref BROKER_CONNECT_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("metricpipe_broker_connect_attempts_total", "Broker metadata probes"),
        &["outcome"] // success, failure
    ).expect("metric can be created");

    // ============================================================================
    // Ingestor Metrics
    // ============================================================================

    /// HTTP polls completed, by response status
    pub static ref INGESTOR_POLLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("metricpipe_ingestor_polls_total", "HTTP polls completed"),
        &["status"]
    ).expect("metric can be created");

    /// HTTP polls that failed before a response body was read
    pub static ref INGESTOR_HTTP_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "metricpipe_ingestor_http_errors_total",
        "HTTP polls that failed at the transport level"
    ).expect("metric can be created");

    /// Events published to the broker
    pub static ref INGESTOR_EVENTS_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("metricpipe_ingestor_events_published_total", "Events published"),
        &["topic"]
    ).expect("metric can be created");

    /// Payload bytes published to the broker
    pub static ref INGESTOR_BYTES_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("metricpipe_ingestor_bytes_published_total", "Payload bytes published"),
        &["topic"]
    ).expect("metric can be created");

    // ============================================================================
    // Collector Metrics
    // ============================================================================

    /// Events received from the broker
    pub static ref COLLECTOR_EVENTS_CONSUMED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("metricpipe_collector_events_consumed_total", "Events consumed"),
        &["topic"]
    ).expect("metric can be created");

    /// Broker-level consume failures
    pub static ref COLLECTOR_CONSUME_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "metricpipe_collector_consume_errors_total",
        "Broker-level consume failures"
    ).expect("metric can be created");

    /// Events dropped because a field could not be extracted
    pub static ref COLLECTOR_EXTRACTION_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("metricpipe_collector_extraction_failures_total", "Events dropped during extraction"),
        &["reason"] // invalid_json, pointer_not_found, type_mismatch, unbound
    ).expect("metric can be created");

    /// Events dropped because the insert failed
    pub static ref COLLECTOR_PERSISTENCE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "metricpipe_collector_persistence_failures_total",
        "Events dropped because the insert failed"
    ).expect("metric can be created");

    /// Rows written to the relational store
    pub static ref COLLECTOR_ROWS_INSERTED_TOTAL: IntCounter = IntCounter::new(
        "metricpipe_collector_rows_inserted_total",
        "Rows inserted"
    ).expect("metric can be created");

    /// Insert latency, connect through close
    pub static ref COLLECTOR_INSERT_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("metricpipe_collector_insert_latency_seconds", "Insert latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["outcome"]
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(BROKER_CONNECT_ATTEMPTS_TOTAL.clone()))
            .expect("broker_connect_attempts_total can be registered");

        // Ingestor metrics
        REGISTRY
            .register(Box::new(INGESTOR_POLLS_TOTAL.clone()))
            .expect("ingestor_polls_total can be registered");
        REGISTRY
            .register(Box::new(INGESTOR_HTTP_ERRORS_TOTAL.clone()))
            .expect("ingestor_http_errors_total can be registered");
        REGISTRY
            .register(Box::new(INGESTOR_EVENTS_PUBLISHED_TOTAL.clone()))
            .expect("ingestor_events_published_total can be registered");
        REGISTRY
            .register(Box::new(INGESTOR_BYTES_PUBLISHED_TOTAL.clone()))
            .expect("ingestor_bytes_published_total can be registered");

        // Collector metrics
        REGISTRY
            .register(Box::new(COLLECTOR_EVENTS_CONSUMED_TOTAL.clone()))
            .expect("collector_events_consumed_total can be registered");
        REGISTRY
            .register(Box::new(COLLECTOR_CONSUME_ERRORS_TOTAL.clone()))
            .expect("collector_consume_errors_total can be registered");
        REGISTRY
            .register(Box::new(COLLECTOR_EXTRACTION_FAILURES_TOTAL.clone()))
            .expect("collector_extraction_failures_total can be registered");
        REGISTRY
            .register(Box::new(COLLECTOR_PERSISTENCE_FAILURES_TOTAL.clone()))
            .expect("collector_persistence_failures_total can be registered");
        REGISTRY
            .register(Box::new(COLLECTOR_ROWS_INSERTED_TOTAL.clone()))
            .expect("collector_rows_inserted_total can be registered");
        REGISTRY
            .register(Box::new(COLLECTOR_INSERT_LATENCY.clone()))
            .expect("collector_insert_latency can be registered");
    });
}
