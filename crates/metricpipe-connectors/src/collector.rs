//! The collector loop: consume, extract, bind, insert.
//!
//! Messages move through `Received -> Extracted -> Bound -> Inserted`. A
//! failure at any stage reports the message and drops it; the next message
//! starts from `Received` again. Nothing is retried in place, and no error
//! from a single message or from the broker ends the loop.

use std::fmt;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use metricpipe_observability::metrics;

use crate::error::PipelineError;
use crate::extraction::ExtractionSpec;
use crate::template::PreparedInsert;
use crate::traits::{EventSource, RawEvent, RowStore};

/// Progress of one message through the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStage {
    Received,
    Extracted,
    Bound,
    Inserted,
    Reported,
}

impl fmt::Display for MessageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStage::Received => "received",
            MessageStage::Extracted => "extracted",
            MessageStage::Bound => "bound",
            MessageStage::Inserted => "inserted",
            MessageStage::Reported => "reported",
        };
        f.write_str(s)
    }
}

/// How processing of one message ended.
#[derive(Debug)]
pub enum MessageOutcome {
    Inserted {
        rows: u64,
    },
    /// The message was dropped. `failed_after` is the last stage it reached.
    Reported {
        failed_after: MessageStage,
        error: PipelineError,
    },
}

impl MessageOutcome {
    /// The terminal stage, `Inserted` or `Reported`.
    pub fn stage(&self) -> MessageStage {
        match self {
            MessageOutcome::Inserted { .. } => MessageStage::Inserted,
            MessageOutcome::Reported { .. } => MessageStage::Reported,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, MessageOutcome::Inserted { .. })
    }
}

pub struct Collector<S, R> {
    source: S,
    store: R,
    spec: ExtractionSpec,
    insert: PreparedInsert,
}

impl<S: EventSource, R: RowStore> Collector<S, R> {
    /// `insert` must have been prepared against `spec`.
    pub fn new(source: S, store: R, spec: ExtractionSpec, insert: PreparedInsert) -> Self {
        Self {
            source,
            store,
            spec,
            insert,
        }
    }

    pub fn spec(&self) -> &ExtractionSpec {
        &self.spec
    }

    /// Run one message through extraction, binding and insert.
    pub async fn process(&self, event: &RawEvent) -> MessageOutcome {
        metrics::COLLECTOR_EVENTS_CONSUMED_TOTAL
            .with_label_values(&[event.topic.as_str()])
            .inc();

        let row = match self.spec.extract(&event.payload) {
            Ok(row) => row,
            Err(e) => {
                metrics::COLLECTOR_EXTRACTION_FAILURES_TOTAL
                    .with_label_values(&[e.reason()])
                    .inc();
                warn!(
                    partition = event.partition,
                    offset = event.offset,
                    error = %e,
                    "dropping message: extraction failed"
                );
                return MessageOutcome::Reported {
                    failed_after: MessageStage::Received,
                    error: e.into(),
                };
            }
        };

        let values = match self.insert.bind(&row, Utc::now().naive_utc()) {
            Ok(values) => values,
            Err(e) => {
                metrics::COLLECTOR_EXTRACTION_FAILURES_TOTAL
                    .with_label_values(&[e.reason()])
                    .inc();
                warn!(
                    partition = event.partition,
                    offset = event.offset,
                    error = %e,
                    "dropping message: bind failed"
                );
                return MessageOutcome::Reported {
                    failed_after: MessageStage::Extracted,
                    error: e.into(),
                };
            }
        };

        let started = Instant::now();
        match self.store.insert(self.insert.sql(), &values).await {
            Ok(rows) => {
                metrics::COLLECTOR_INSERT_LATENCY
                    .with_label_values(&["success"])
                    .observe(started.elapsed().as_secs_f64());
                metrics::COLLECTOR_ROWS_INSERTED_TOTAL.inc_by(rows);
                debug!(partition = event.partition, offset = event.offset, rows, "inserted row");
                MessageOutcome::Inserted { rows }
            }
            Err(e) => {
                metrics::COLLECTOR_INSERT_LATENCY
                    .with_label_values(&["failure"])
                    .observe(started.elapsed().as_secs_f64());
                metrics::COLLECTOR_PERSISTENCE_FAILURES_TOTAL.inc();
                error!(
                    partition = event.partition,
                    offset = event.offset,
                    error = %e,
                    "dropping message: insert failed"
                );
                MessageOutcome::Reported {
                    failed_after: MessageStage::Bound,
                    error: e,
                }
            }
        }
    }

    /// Wait for the next message and process it.
    ///
    /// Returns `None` when the source reported a consume error.
    pub async fn run_once(&mut self) -> Option<MessageOutcome> {
        match self.source.next_event().await {
            Ok(event) => Some(self.process(&event).await),
            Err(e) => {
                metrics::COLLECTOR_CONSUME_ERRORS_TOTAL.inc();
                warn!(error = %e, "consume failed");
                None
            }
        }
    }

    /// Consume forever.
    pub async fn run(&mut self) {
        info!(
            fields = self.spec.len(),
            timestamp_field = self.insert.timestamp_field().unwrap_or("-"),
            "collector started"
        );
        loop {
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, Result};
    use crate::template::{BindValue, InsertTemplate};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn event(offset: i64, body: &str) -> RawEvent {
        RawEvent {
            topic: "metrics".to_string(),
            partition: 0,
            offset,
            timestamp: None,
            payload: Bytes::from(body.to_string()),
        }
    }

    struct ScriptedSource(VecDeque<Result<RawEvent>>);

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_event(&mut self) -> Result<RawEvent> {
            match self.0.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingStore {
        rows: Arc<Mutex<Vec<(String, Vec<BindValue>)>>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl RowStore for RecordingStore {
        async fn insert(&self, sql: &str, values: &[BindValue]) -> Result<u64> {
            if let Some(msg) = &self.fail_with {
                return Err(PipelineError::Persistence(msg.clone()));
            }
            self.rows
                .lock()
                .unwrap()
                .push((sql.to_string(), values.to_vec()));
            Ok(1)
        }
    }

    fn collector(
        script: Vec<Result<RawEvent>>,
        store: RecordingStore,
    ) -> Collector<ScriptedSource, RecordingStore> {
        let spec =
            ExtractionSpec::from_json(r#"{"val": {"pointer": "/data/value", "type": "int"}}"#)
                .unwrap();
        let insert = InsertTemplate::parse("INSERT INTO t(val) VALUES (@val)")
            .unwrap()
            .prepare(&spec, None)
            .unwrap();
        Collector::new(ScriptedSource(script.into()), store, spec, insert)
    }

    // ---------------------------------------------------------------
    // Per-message stages
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_process_happy_path() {
        let store = RecordingStore::default();
        let c = collector(vec![], store.clone());

        let outcome = c.process(&event(0, r#"{"data":{"value":42}}"#)).await;
        assert!(outcome.is_inserted());
        assert_eq!(outcome.stage(), MessageStage::Inserted);

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "INSERT INTO t(val) VALUES ($1)");
        assert_eq!(rows[0].1, vec![BindValue::Int(42)]);
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_store() {
        let store = RecordingStore::default();
        let c = collector(vec![], store.clone());

        let outcome = c.process(&event(0, r#"{"data":{"value":"nope"}}"#)).await;
        match outcome {
            MessageOutcome::Reported {
                failed_after,
                error: PipelineError::Extraction(ExtractionError::TypeMismatch { .. }),
            } => assert_eq!(failed_after, MessageStage::Received),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported() {
        let store = RecordingStore {
            fail_with: Some("duplicate key".to_string()),
            ..Default::default()
        };
        let c = collector(vec![], store);

        let outcome = c.process(&event(0, r#"{"data":{"value":1}}"#)).await;
        assert_eq!(outcome.stage(), MessageStage::Reported);
        assert!(matches!(
            outcome,
            MessageOutcome::Reported {
                failed_after: MessageStage::Bound,
                error: PipelineError::Persistence(_)
            }
        ));
    }

    // ---------------------------------------------------------------
    // Loop behaviour
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_consume_error_does_not_stop_loop() {
        let store = RecordingStore::default();
        let mut c = collector(
            vec![
                Err(PipelineError::Consume("broker transport failure".to_string())),
                Ok(event(1, r#"{"data":{"value":7}}"#)),
            ],
            store.clone(),
        );

        assert!(c.run_once().await.is_none());
        assert!(c.run_once().await.unwrap().is_inserted());
        assert_eq!(store.rows.lock().unwrap()[0].1, vec![BindValue::Int(7)]);
    }

    #[tokio::test]
    async fn test_run_keeps_going_past_bad_messages() {
        let store = RecordingStore::default();
        let mut c = collector(
            vec![
                Ok(event(0, r#"{"data":{"value":1}}"#)),
                Ok(event(1, "not json")),
                Err(PipelineError::Consume("rebalance".to_string())),
                Ok(event(2, r#"{"data":{}}"#)),
                Ok(event(3, r#"{"data":{"value":4}}"#)),
            ],
            store.clone(),
        );

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(200), c.run()).await;
        assert!(result.is_err(), "run should never return");

        let values: Vec<Vec<BindValue>> = store
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v)| v.clone())
            .collect();
        assert_eq!(values, vec![vec![BindValue::Int(1)], vec![BindValue::Int(4)]]);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(MessageStage::Bound.to_string(), "bound");
        assert_eq!(MessageStage::Reported.to_string(), "reported");
    }
}
