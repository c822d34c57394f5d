//! Broker connection establishment.
//!
//! Both services call [`BrokerConnector::ensure_connected`] before entering
//! their main loop. The connector opens a fresh administrative connection
//! per attempt and asks for cluster metadata with a short timeout. Any
//! failure is treated as transient and the next attempt starts
//! immediately; the per-attempt timeout is the only pacing.
//!
//! ```text
//!  Disconnected ──► Probing ──► Connected
//!                    ▲   │
//!                    └───┘ attempt failed
//! ```
//!
//! Losing the broker after `Connected` is not detected here.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use metricpipe_observability::metrics;

use crate::error::Result;

/// Where the connector is in its startup handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Probing,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Probing => write!(f, "probing"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// One broker from a metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

/// The metadata returned by the first successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    /// Id of the broker that answered the query.
    pub originating_broker_id: i32,
    /// Name (`host:port/id`) of the broker that answered the query.
    pub originating_broker_name: String,
    pub brokers: Vec<BrokerInfo>,
    pub topics: Vec<String>,
}

impl BrokerMetadata {
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}

/// A single metadata query against a fresh connection.
///
/// Implementations must not reuse a connection between calls.
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<BrokerMetadata>;
}

/// Blocks service startup until the broker answers a metadata query.
pub struct BrokerConnector<P> {
    address: String,
    timeout: Duration,
    probe: P,
    state: ConnectionState,
    attempts: u64,
    metadata: Option<BrokerMetadata>,
}

impl<P: MetadataProbe> BrokerConnector<P> {
    pub fn with_probe(address: impl Into<String>, timeout: Duration, probe: P) -> Self {
        Self {
            address: address.into(),
            timeout,
            probe,
            state: ConnectionState::Disconnected,
            attempts: 0,
            metadata: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Metadata attempts made so far, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Probe until the broker answers, then return its metadata.
    ///
    /// There is no attempt limit. Once connected, further calls return the
    /// metadata from the first success without probing again.
    pub async fn ensure_connected(&mut self) -> BrokerMetadata {
        if let Some(metadata) = &self.metadata {
            return metadata.clone();
        }

        self.state = ConnectionState::Probing;
        debug!(address = %self.address, timeout_ms = self.timeout.as_millis() as u64, "probing broker");

        loop {
            self.attempts += 1;
            match self.probe.probe(&self.address, self.timeout).await {
                Ok(metadata) => {
                    metrics::BROKER_CONNECT_ATTEMPTS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    self.state = ConnectionState::Connected;
                    info!(
                        broker_id = metadata.originating_broker_id,
                        attempts = self.attempts,
                        "Connected to Kafka broker {}",
                        metadata.originating_broker_name
                    );
                    self.metadata = Some(metadata.clone());
                    return metadata;
                }
                Err(e) => {
                    metrics::BROKER_CONNECT_ATTEMPTS_TOTAL
                        .with_label_values(&["failure"])
                        .inc();
                    warn!(
                        attempt = self.attempts,
                        address = %self.address,
                        error = %e,
                        "broker not reachable, retrying"
                    );
                    // A refused connection can fail without ever yielding.
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}
