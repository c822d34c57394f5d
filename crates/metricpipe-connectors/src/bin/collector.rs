//! metricpipe collector
//!
//! Consumes metric events from a Kafka topic, extracts typed fields with
//! JSON pointers and inserts one PostgreSQL row per event.
//!
//! ## Configuration
//! All configuration is done via environment variables:
//!
//! - `KAFKA_BOOTSTRAP_SERVER`: Broker address (required)
//! - `KAFKA_TOPIC`: Topic to consume (required)
//! - `KAFKA_GROUP_ID`: Consumer group id (required)
//! - `KAFKA_CONNECT_TIMEOUT`: Per-attempt broker metadata timeout in ms (default: 1000)
//! - `JSON_POINTER_EXTRACTORS`: `{"field": {"pointer": "/a/b", "type": "int"}}` (required)
//! - `POSTGRESQL_CONNECTION_STRING`: `postgres://` URL (required)
//! - `POSTGRESQL_INSERT_STATEMENT`: Insert with `@field` placeholders (required)
//! - `ADD_TIMESTAMP`: Placeholder name for the capture time; setting it enables the timestamp
//! - `METRICS_ADDR`: Address to serve Prometheus `/metrics` on (optional)
//!
//! ## Example
//! ```bash
//! export JSON_POINTER_EXTRACTORS='{"load": {"pointer": "/cpu/load", "type": "float"}}'
//! export POSTGRESQL_INSERT_STATEMENT='INSERT INTO cpu (load, ts) VALUES (@load, @ts)'
//! export ADD_TIMESTAMP=ts
//! cargo run -p metricpipe-connectors --bin metric-collector
//! ```

use metricpipe_connectors::{
    BrokerConnector, Collector, CollectorConfig, KafkaEventSource, PostgresRowStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = CollectorConfig::from_env()?;
    config.log_startup();

    metricpipe_observability::init();
    if let Some(addr) = config.metrics_addr {
        let _exporter = metricpipe_observability::spawn_metrics_server(addr).await?;
    }

    let store = PostgresRowStore::new(&config.connection_string)?;

    let mut connector =
        BrokerConnector::new(config.kafka.bootstrap_servers.clone(), config.kafka.connect_timeout);
    connector.ensure_connected().await;

    let source = KafkaEventSource::subscribe(
        &config.kafka.bootstrap_servers,
        &config.group_id,
        &config.kafka.topic,
    )?;

    Collector::new(source, store, config.spec, config.insert)
        .run()
        .await;
    Ok(())
}
