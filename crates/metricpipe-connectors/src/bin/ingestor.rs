//! metricpipe ingestor
//!
//! Polls an HTTP endpoint on a fixed interval and publishes every response
//! body to a Kafka topic.
//!
//! ## Configuration
//! All configuration is done via environment variables:
//!
//! - `KAFKA_BOOTSTRAP_SERVER`: Broker address (required)
//! - `KAFKA_TOPIC`: Topic to publish to (required)
//! - `KAFKA_CONNECT_TIMEOUT`: Per-attempt broker metadata timeout in ms (required)
//! - `METRIC_ENDPOINT`: URL to poll (required)
//! - `METRIC_METHOD`: HTTP verb (required)
//! - `METRIC_INTERVAL`: Delay between polls in ms (required)
//! - `METRIC_HEADERS`: Request headers as a JSON object (required)
//! - `METRIC_TIMEOUT`: Per-request timeout in ms (optional, no timeout by default)
//! - `METRICS_ADDR`: Address to serve Prometheus `/metrics` on (optional)
//!
//! ## Logging
//! Logging is controlled via the `RUST_LOG` environment variable (default: `info`).

use metricpipe_connectors::{
    BrokerConnector, HttpMetricSource, Ingestor, IngestorConfig, KafkaEventPublisher,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = IngestorConfig::from_env()?;
    config.log_startup();

    metricpipe_observability::init();
    if let Some(addr) = config.metrics_addr {
        let _exporter = metricpipe_observability::spawn_metrics_server(addr).await?;
    }

    let mut connector =
        BrokerConnector::new(config.kafka.bootstrap_servers.clone(), config.kafka.connect_timeout);
    let metadata = connector.ensure_connected().await;
    if !metadata.has_topic(&config.kafka.topic) {
        tracing::warn!(topic = %config.kafka.topic, "topic not in broker metadata yet");
    }

    let publisher = KafkaEventPublisher::new(&config.kafka.bootstrap_servers, &config.kafka.topic)?;
    let fetcher = HttpMetricSource::new(
        config.endpoint,
        config.method,
        config.headers,
        config.request_timeout,
    )?;

    Ingestor::new(fetcher, publisher, config.interval).run().await?;
    Ok(())
}
