//! Error types for the metricpipe connectors.
//!
//! `PipelineError` follows the error taxonomy of the two services: only
//! [`PipelineError::Config`], [`PipelineError::Serialization`] and
//! [`PipelineError::Publish`] end a process. Every other variant is
//! reported by the loop that produced it and the loop moves on.

use thiserror::Error;

/// Errors that can occur anywhere in the ingestor or collector.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker could not be reached. Retried by the broker connector.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Broker-level failure while reading the next event.
    #[error("Consume error: {0}")]
    Consume(String),

    /// A field could not be extracted from an event.
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// The insert statement failed to execute.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An event could not be handed to the broker.
    #[error("Publish error: {0}")]
    Publish(String),

    /// The HTTP poll failed before a body was read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Per-message extraction failures.
///
/// Any of these drops the whole message; there is no partial insert.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    /// The event body is not valid UTF-8 JSON.
    #[error("event is not valid JSON: {0}")]
    InvalidJson(String),

    /// The pointer did not resolve against the event.
    #[error("field '{field}': pointer '{pointer}' did not resolve")]
    PointerNotFound { field: String, pointer: String },

    /// The pointer resolved to a value of the wrong JSON type.
    #[error("field '{field}': pointer '{pointer}' expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        pointer: String,
        expected: &'static str,
        found: String,
    },

    /// A statement placeholder had no value at bind time.
    #[error("placeholder '@{0}' has no bound value")]
    Unbound(String),
}

impl ExtractionError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ExtractionError::InvalidJson(_) => "invalid_json",
            ExtractionError::PointerNotFound { .. } => "pointer_not_found",
            ExtractionError::TypeMismatch { .. } => "type_mismatch",
            ExtractionError::Unbound(_) => "unbound",
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}
