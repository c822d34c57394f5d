//! The ingestor loop: poll, publish, sleep.
//!
//! Each iteration issues one request, waits for the whole body and publishes
//! it unchanged as one event. The interval is slept after the publish, so
//! a slow endpoint stretches the effective period. Error statuses are not
//! special: whatever the endpoint returned is the event.
//!
//! A transport failure (no response at all) skips the publish for that
//! iteration. A publish failure ends the loop, since the broker connection
//! is only guaranteed once at startup.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use metricpipe_observability::metrics;

use crate::error::{PipelineError, Result};
use crate::traits::{EventPublisher, MetricFetcher};

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A response was received and its body published.
    Published { status: u16, bytes: usize },
    /// The request failed before a response arrived; nothing was published.
    Skipped,
}

pub struct Ingestor<F, P> {
    fetcher: F,
    publisher: P,
    interval: Duration,
}

impl<F: MetricFetcher, P: EventPublisher> Ingestor<F, P> {
    pub fn new(fetcher: F, publisher: P, interval: Duration) -> Self {
        Self {
            fetcher,
            publisher,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll once and publish the body.
    ///
    /// Only a publish failure is returned as an error.
    pub async fn run_once(&self) -> Result<PollOutcome> {
        let response = match self.fetcher.fetch().await {
            Ok(response) => response,
            Err(e @ PipelineError::Http(_)) => {
                metrics::INGESTOR_HTTP_ERRORS_TOTAL.inc();
                warn!(endpoint = %self.fetcher.endpoint(), error = %e, "poll failed, skipping");
                return Ok(PollOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let status = response.status;
        metrics::INGESTOR_POLLS_TOTAL
            .with_label_values(&[status.to_string().as_str()])
            .inc();
        if !response.is_success() {
            warn!(
                endpoint = %self.fetcher.endpoint(),
                status,
                "endpoint returned an error status, publishing body anyway"
            );
        }

        let bytes = response.body.len();
        self.publisher.publish(response.body).await?;

        let topic = self.publisher.topic();
        metrics::INGESTOR_EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[topic])
            .inc();
        metrics::INGESTOR_BYTES_PUBLISHED_TOTAL
            .with_label_values(&[topic])
            .inc_by(bytes as u64);
        debug!(topic = %topic, status, bytes, "published metrics event");

        Ok(PollOutcome::Published { status, bytes })
    }

    /// Poll forever. Returns only when a publish fails.
    pub async fn run(&self) -> Result<()> {
        info!(
            endpoint = %self.fetcher.endpoint(),
            topic = %self.publisher.topic(),
            interval_ms = self.interval.as_millis() as u64,
            "ingestor started"
        );

        loop {
            if let Err(e) = self.run_once().await {
                error!(topic = %self.publisher.topic(), error = %e, "publish failed, stopping ingestor");
                return Err(e);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MetricResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Returns scripted results, then repeats the last body forever.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<MetricResponse>>>,
        calls: Arc<Mutex<Vec<Instant>>>,
        latency: Duration,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<MetricResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Arc::new(Mutex::new(Vec::new())),
                latency: Duration::ZERO,
            }
        }

        fn ok(status: u16, body: &'static str) -> Result<MetricResponse> {
            Ok(MetricResponse {
                status,
                body: Bytes::from(body),
            })
        }
    }

    #[async_trait]
    impl MetricFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<MetricResponse> {
            self.calls.lock().unwrap().push(Instant::now());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Self::ok(200, "{}"))
        }

        fn endpoint(&self) -> &str {
            "http://test/metrics"
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<Bytes>>>,
        fail_after: Option<usize>,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, payload: Bytes) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(PipelineError::Publish("broker gone".to_string()));
            }
            self.published.lock().unwrap().push(payload);
            Ok(())
        }

        fn topic(&self) -> &str {
            "metrics"
        }
    }

    // ---------------------------------------------------------------
    // Single iteration
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_run_once_publishes_body_verbatim() {
        let body = "{\"cpu\": 0.93,\n \"host\": \"a\"}  ";
        let publisher = RecordingPublisher::default();
        let ingestor = Ingestor::new(
            ScriptedFetcher::new(vec![ScriptedFetcher::ok(200, body)]),
            publisher.clone(),
            Duration::from_secs(1),
        );

        let outcome = ingestor.run_once().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Published {
                status: 200,
                bytes: body.len()
            }
        );
        assert_eq!(*publisher.published.lock().unwrap(), vec![Bytes::from(body)]);
    }

    #[tokio::test]
    async fn test_error_status_body_is_still_published() {
        let publisher = RecordingPublisher::default();
        let ingestor = Ingestor::new(
            ScriptedFetcher::new(vec![ScriptedFetcher::ok(500, "internal error")]),
            publisher.clone(),
            Duration::from_secs(1),
        );

        let outcome = ingestor.run_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Published { status: 500, .. }));
        assert_eq!(
            *publisher.published.lock().unwrap(),
            vec![Bytes::from("internal error")]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_skips_publish() {
        let publisher = RecordingPublisher::default();
        let ingestor = Ingestor::new(
            ScriptedFetcher::new(vec![Err(PipelineError::Http("refused".to_string()))]),
            publisher.clone(),
            Duration::from_secs(1),
        );

        assert_eq!(ingestor.run_once().await.unwrap(), PollOutcome::Skipped);
        assert!(publisher.published.lock().unwrap().is_empty());
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let publisher = RecordingPublisher {
            fail_after: Some(0),
            ..Default::default()
        };
        let ingestor = Ingestor::new(
            ScriptedFetcher::new(vec![]),
            publisher,
            Duration::from_secs(1),
        );
        assert!(matches!(
            ingestor.run_once().await,
            Err(PipelineError::Publish(_))
        ));
    }

    // ---------------------------------------------------------------
    // Loop timing
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_one_event_per_poll_with_interval_between() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let calls = fetcher.calls.clone();
        let publisher = RecordingPublisher::default();
        let published = publisher.published.clone();
        let interval = Duration::from_millis(1000);

        let handle = tokio::spawn(async move {
            let ingestor = Ingestor::new(fetcher, publisher, interval);
            ingestor.run().await
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.abort();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(published.lock().unwrap().len(), 4);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_endpoint_stretches_period() {
        let mut fetcher = ScriptedFetcher::new(vec![]);
        fetcher.latency = Duration::from_millis(500);
        let calls = fetcher.calls.clone();
        let interval = Duration::from_millis(1000);

        let handle = tokio::spawn(async move {
            let ingestor = Ingestor::new(fetcher, RecordingPublisher::default(), interval);
            ingestor.run().await
        });

        tokio::time::sleep(Duration::from_millis(3200)).await;
        handle.abort();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_poll_still_waits_and_continues() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(PipelineError::Http("timeout".to_string())),
            ScriptedFetcher::ok(200, "second"),
        ]);
        let calls = fetcher.calls.clone();
        let publisher = RecordingPublisher::default();
        let published = publisher.published.clone();

        let handle = tokio::spawn(async move {
            Ingestor::new(fetcher, publisher, Duration::from_millis(100))
                .run()
                .await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_millis(100));
        assert_eq!(*published.lock().unwrap(), vec![Bytes::from("second")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_publish_failure() {
        let publisher = RecordingPublisher {
            fail_after: Some(2),
            ..Default::default()
        };
        let published = publisher.published.clone();
        let ingestor = Ingestor::new(
            ScriptedFetcher::new(vec![]),
            publisher,
            Duration::from_millis(10),
        );

        let err = ingestor.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Publish(_)));
        assert_eq!(published.lock().unwrap().len(), 2);
    }
}
