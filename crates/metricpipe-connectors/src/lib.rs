//! metricpipe connectors
//!
//! Relays metrics from an HTTP endpoint into PostgreSQL through a Kafka
//! topic. Two services share this crate:
//!
//! - **metric-ingestor** polls an endpoint on a fixed interval and publishes
//!   each response body, untouched, to a topic.
//! - **metric-collector** consumes that topic, pulls typed fields out of
//!   each JSON event with JSON pointers and inserts them as one row.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP endpoint ──► Ingestor ──► Kafka topic ──► Collector ──► PostgreSQL
//!                       │                            │
//!                       └──── BrokerConnector ───────┘
//! ```
//!
//! - **Broker**: `BrokerConnector` blocks startup until a metadata query succeeds.
//! - **Extraction**: `ExtractionSpec` maps field names to a pointer and a scalar type.
//! - **Template**: `InsertTemplate` turns `@name` placeholders into positional ones.
//! - **Traits**: `MetricFetcher`, `EventPublisher`, `EventSource` and `RowStore`
//!   are the seams to HTTP, Kafka and PostgreSQL.
//! - **Config**: `IngestorConfig` and `CollectorConfig` read the environment.

pub mod broker;
pub mod collector;
pub mod config;
pub mod error;
pub mod extraction;
pub mod ingestor;
pub mod kafka;
pub mod sinks;
pub mod sources;
pub mod template;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use broker::{BrokerConnector, BrokerInfo, BrokerMetadata, ConnectionState, MetadataProbe};
pub use collector::{Collector, MessageOutcome, MessageStage};
pub use config::{CollectorConfig, IngestorConfig, KafkaConfig};
pub use error::{ExtractionError, PipelineError, Result};
pub use extraction::{ExtractedRow, ExtractionSpec, PointerSpec, ScalarType, TypedValue};
pub use ingestor::{Ingestor, PollOutcome};
pub use kafka::{KafkaEventPublisher, KafkaEventSource, KafkaMetadataProbe};
pub use sinks::PostgresRowStore;
pub use sources::HttpMetricSource;
pub use template::{BindValue, InsertTemplate, PreparedInsert};
pub use traits::{EventPublisher, EventSource, MetricFetcher, MetricResponse, RawEvent, RowStore};
