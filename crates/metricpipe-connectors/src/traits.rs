//! Seams between the two service loops and the outside world.
//!
//! The ingestor talks to a [`MetricFetcher`] and an [`EventPublisher`]; the
//! collector talks to an [`EventSource`] and a [`RowStore`]. The Kafka,
//! HTTP and PostgreSQL implementations live in [`crate::kafka`],
//! [`crate::sources`] and [`crate::sinks`]; tests substitute in-memory ones.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::template::BindValue;

/// An event read from the metrics topic.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Topic the event was consumed from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Broker timestamp in milliseconds since epoch, when present.
    pub timestamp: Option<i64>,
    /// The event body exactly as the ingestor published it.
    pub payload: Bytes,
}

/// One HTTP poll of the metrics endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricResponse {
    pub status: u16,
    pub body: Bytes,
}

impl MetricResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches the current metrics document.
#[async_trait]
pub trait MetricFetcher: Send + Sync {
    /// Issue one request and read the full body.
    ///
    /// Transport failures are [`crate::PipelineError::Http`]; any status
    /// code with a readable body is `Ok`.
    async fn fetch(&self) -> Result<MetricResponse>;

    /// The endpoint being polled, for logs.
    fn endpoint(&self) -> &str;
}

/// Publishes opaque payloads to a single topic.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hand one payload to the broker and wait for the delivery report.
    async fn publish(&self, payload: Bytes) -> Result<()>;

    fn topic(&self) -> &str;
}

/// Yields events from a subscribed topic.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next event.
    ///
    /// Returns [`crate::PipelineError::Consume`] for broker-level failures;
    /// the caller reports it and asks again.
    async fn next_event(&mut self) -> Result<RawEvent>;
}

/// Executes a positional insert statement.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Run `sql` with `values` bound to `$1..$n`. Returns rows affected.
    async fn insert(&self, sql: &str, values: &[BindValue]) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // ---------------------------------------------------------------
    // Records
    // ---------------------------------------------------------------

    #[test]
    fn test_raw_event_construction() {
        let event = RawEvent {
            topic: "metrics".to_string(),
            partition: 0,
            offset: 42,
            timestamp: Some(1_700_000_000_000),
            payload: Bytes::from(r#"{"data":{"value":7}}"#),
        };
        assert_eq!(event.topic, "metrics");
        assert_eq!(event.offset, 42);
        assert_eq!(event.payload, Bytes::from(r#"{"data":{"value":7}}"#));
    }

    #[test]
    fn test_metric_response_success_range() {
        let ok = MetricResponse {
            status: 204,
            body: Bytes::new(),
        };
        let err = MetricResponse {
            status: 503,
            body: Bytes::from("down"),
        };
        assert!(ok.is_success());
        assert!(!err.is_success());
    }

    // ---------------------------------------------------------------
    // Trait object safety
    // ---------------------------------------------------------------

    struct QueueSource(VecDeque<RawEvent>);

    #[async_trait]
    impl EventSource for QueueSource {
        async fn next_event(&mut self) -> Result<RawEvent> {
            self.0
                .pop_front()
                .ok_or_else(|| crate::PipelineError::Consume("empty".to_string()))
        }
    }

    struct NullStore;

    #[async_trait]
    impl RowStore for NullStore {
        async fn insert(&self, _sql: &str, values: &[BindValue]) -> Result<u64> {
            Ok(values.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_source_as_trait_object() {
        let mut source: Box<dyn EventSource> = Box::new(QueueSource(VecDeque::from(vec![
            RawEvent {
                topic: "t".to_string(),
                partition: 0,
                offset: 0,
                timestamp: None,
                payload: Bytes::from("x"),
            },
        ])));
        assert_eq!(source.next_event().await.unwrap().offset, 0);
        assert!(source.next_event().await.is_err());
    }

    #[tokio::test]
    async fn test_store_as_trait_object() {
        let store: &dyn RowStore = &NullStore;
        let n = store
            .insert("INSERT INTO t VALUES ($1)", &[BindValue::Int(1)])
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
