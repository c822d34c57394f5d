//! Kafka implementations of the broker seams, built on `rdkafka`.
//!
//! - [`KafkaMetadataProbe`] creates a throwaway `BaseConsumer` for every
//!   attempt and drops it afterwards, so no half-open client survives a
//!   failed probe.
//! - [`KafkaEventPublisher`] wraps a `FutureProducer`; events have no key
//!   and no explicit partition.
//! - [`KafkaEventSource`] wraps a subscribed `StreamConsumer` with broker
//!   auto-commit, which gives at-least-once delivery.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::broker::{BrokerConnector, BrokerInfo, BrokerMetadata, MetadataProbe};
use crate::error::{PipelineError, Result};
use crate::traits::{EventPublisher, EventSource, RawEvent};

/// How long `publish` waits for room in the producer queue.
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata probe over a fresh `BaseConsumer` per call.
#[derive(Debug, Clone, Default)]
pub struct KafkaMetadataProbe;

impl KafkaMetadataProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataProbe for KafkaMetadataProbe {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<BrokerMetadata> {
        let address = address.to_string();
        // fetch_metadata blocks the calling thread for up to `timeout`.
        tokio::task::spawn_blocking(move || fetch_metadata(&address, timeout))
            .await
            .map_err(|e| PipelineError::Connection(format!("metadata task failed: {}", e)))?
    }
}

impl BrokerConnector<KafkaMetadataProbe> {
    /// A connector that probes `address` with a real Kafka client.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self::with_probe(address, timeout, KafkaMetadataProbe::new())
    }
}

fn fetch_metadata(address: &str, timeout: Duration) -> Result<BrokerMetadata> {
    let client: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", address)
        .create()
        .map_err(|e| PipelineError::Connection(format!("failed to create admin client: {}", e)))?;

    let metadata = client
        .fetch_metadata(None, timeout)
        .map_err(|e| PipelineError::Connection(format!("metadata request failed: {}", e)))?;

    Ok(BrokerMetadata {
        originating_broker_id: metadata.orig_broker_id(),
        originating_broker_name: metadata.orig_broker_name().to_string(),
        brokers: metadata
            .brokers()
            .iter()
            .map(|b| BrokerInfo {
                id: b.id(),
                host: b.host().to_string(),
                port: b.port(),
            })
            .collect(),
        topics: metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .collect(),
    })
}

/// Publishes raw payloads to one topic.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaEventPublisher {
    pub fn new(bootstrap_servers: &str, topic: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .create()
            .map_err(|e| PipelineError::Connection(format!("failed to create producer: {}", e)))?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(payload.as_ref());
        self.producer
            .send(record, self.queue_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| {
                PipelineError::Publish(format!("failed to publish to '{}': {}", self.topic, e))
            })
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

/// Consumes one topic as part of a consumer group.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    /// Create the consumer and subscribe to `topic`.
    pub fn subscribe(bootstrap_servers: &str, group_id: &str, topic: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| PipelineError::Connection(format!("failed to create consumer: {}", e)))?;

        consumer.subscribe(&[topic]).map_err(|e| {
            PipelineError::Connection(format!("failed to subscribe to '{}': {}", topic, e))
        })?;

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn next_event(&mut self) -> Result<RawEvent> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| PipelineError::Consume(e.to_string()))?;

        Ok(RawEvent {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis(),
            payload: msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
        })
    }
}
