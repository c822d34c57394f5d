//! Service configuration.
//!
//! Both binaries are configured entirely through environment variables.
//! `from_env` reads the service's own variables into a map and hands it to
//! `from_config_map`, which does all parsing and validation so that it can
//! be tested without touching the process environment.
//!
//! Everything that can be checked before the first message is checked
//! here: the HTTP verb, the header map, the extraction map and the insert
//! statement's placeholders. Any failure is a [`PipelineError::Config`]
//! and the process must not start.

use std::collections::HashMap;
use std::env::VarError;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::extraction::ExtractionSpec;
use crate::sources::http::{parse_endpoint, parse_headers, parse_method};
use crate::template::{InsertTemplate, PreparedInsert};

pub const KAFKA_BOOTSTRAP_SERVER: &str = "KAFKA_BOOTSTRAP_SERVER";
pub const KAFKA_TOPIC: &str = "KAFKA_TOPIC";
pub const KAFKA_CONNECT_TIMEOUT: &str = "KAFKA_CONNECT_TIMEOUT";
pub const KAFKA_GROUP_ID: &str = "KAFKA_GROUP_ID";
pub const METRIC_ENDPOINT: &str = "METRIC_ENDPOINT";
pub const METRIC_METHOD: &str = "METRIC_METHOD";
pub const METRIC_INTERVAL: &str = "METRIC_INTERVAL";
pub const METRIC_HEADERS: &str = "METRIC_HEADERS";
pub const METRIC_TIMEOUT: &str = "METRIC_TIMEOUT";
pub const JSON_POINTER_EXTRACTORS: &str = "JSON_POINTER_EXTRACTORS";
pub const POSTGRESQL_CONNECTION_STRING: &str = "POSTGRESQL_CONNECTION_STRING";
pub const POSTGRESQL_INSERT_STATEMENT: &str = "POSTGRESQL_INSERT_STATEMENT";
pub const ADD_TIMESTAMP: &str = "ADD_TIMESTAMP";
pub const METRICS_ADDR: &str = "METRICS_ADDR";

const INGESTOR_KEYS: &[&str] = &[
    KAFKA_BOOTSTRAP_SERVER,
    KAFKA_TOPIC,
    KAFKA_CONNECT_TIMEOUT,
    METRIC_ENDPOINT,
    METRIC_METHOD,
    METRIC_INTERVAL,
    METRIC_HEADERS,
    METRIC_TIMEOUT,
    METRICS_ADDR,
];

const COLLECTOR_KEYS: &[&str] = &[
    KAFKA_BOOTSTRAP_SERVER,
    KAFKA_TOPIC,
    KAFKA_CONNECT_TIMEOUT,
    KAFKA_GROUP_ID,
    JSON_POINTER_EXTRACTORS,
    POSTGRESQL_CONNECTION_STRING,
    POSTGRESQL_INSERT_STATEMENT,
    ADD_TIMESTAMP,
    METRICS_ADDR,
];

/// Collector default for `KAFKA_CONNECT_TIMEOUT`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Look up each key, skipping unset ones. A value that is not valid
/// UTF-8 is a configuration error.
fn read_keys<F>(keys: &[&str], lookup: F) -> Result<HashMap<String, String>>
where
    F: Fn(&str) -> std::result::Result<String, VarError>,
{
    let mut config = HashMap::new();
    for key in keys {
        match lookup(key) {
            Ok(value) => {
                config.insert(key.to_string(), value);
            }
            Err(VarError::NotPresent) => {}
            Err(VarError::NotUnicode(_)) => {
                return Err(PipelineError::Config(format!("'{}' is not valid UTF-8", key)));
            }
        }
    }
    Ok(config)
}

fn required(config: &HashMap<String, String>, key: &str) -> Result<String> {
    let value = config
        .get(key)
        .ok_or_else(|| PipelineError::Config(format!("missing required '{}'", key)))?;
    if value.trim().is_empty() {
        return Err(PipelineError::Config(format!("'{}' must not be empty", key)));
    }
    Ok(value.clone())
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| PipelineError::Config(format!("invalid {}: {}", key, e)))
}

fn parse_positive_millis(key: &str, value: &str) -> Result<Duration> {
    let duration = parse_millis(key, value)?;
    if duration.is_zero() {
        return Err(PipelineError::Config(format!("{} must be greater than 0", key)));
    }
    Ok(duration)
}

fn parse_metrics_addr(config: &HashMap<String, String>) -> Result<Option<SocketAddr>> {
    config
        .get(METRICS_ADDR)
        .map(|s| {
            s.trim()
                .parse::<SocketAddr>()
                .map_err(|e| PipelineError::Config(format!("invalid {}: {}", METRICS_ADDR, e)))
        })
        .transpose()
}

/// Hide the password in a connection URL before it is logged.
pub fn redact_connection_string(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}

/// Broker settings shared by both services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    /// Per-attempt metadata timeout.
    pub connect_timeout: Duration,
}

impl KafkaConfig {
    fn from_config_map(
        config: &HashMap<String, String>,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        let bootstrap_servers = required(config, KAFKA_BOOTSTRAP_SERVER)?;
        let topic = required(config, KAFKA_TOPIC)?;

        let connect_timeout = match (config.get(KAFKA_CONNECT_TIMEOUT), default_timeout) {
            (Some(raw), _) => parse_positive_millis(KAFKA_CONNECT_TIMEOUT, raw)?,
            (None, Some(default)) => default,
            (None, None) => {
                return Err(PipelineError::Config(format!(
                    "missing required '{}'",
                    KAFKA_CONNECT_TIMEOUT
                )))
            }
        };

        Ok(Self {
            bootstrap_servers,
            topic,
            connect_timeout,
        })
    }
}

/// Configuration of the `metric-ingestor` binary.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub kafka: KafkaConfig,
    pub endpoint: Url,
    pub method: Method,
    pub headers: HeaderMap,
    /// Delay between the end of one poll and the start of the next.
    pub interval: Duration,
    /// Per-request timeout; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    pub metrics_addr: Option<SocketAddr>,
}

impl IngestorConfig {
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let kafka = KafkaConfig::from_config_map(config, None)?;
        let endpoint = parse_endpoint(&required(config, METRIC_ENDPOINT)?)?;
        let method = parse_method(&required(config, METRIC_METHOD)?)?;
        let headers = parse_headers(&required(config, METRIC_HEADERS)?)?;
        let interval = parse_millis(METRIC_INTERVAL, &required(config, METRIC_INTERVAL)?)?;

        let request_timeout = config
            .get(METRIC_TIMEOUT)
            .map(|s| parse_positive_millis(METRIC_TIMEOUT, s))
            .transpose()?;

        Ok(Self {
            kafka,
            endpoint,
            method,
            headers,
            interval,
            request_timeout,
            metrics_addr: parse_metrics_addr(config)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config_map(&read_keys(INGESTOR_KEYS, |k| std::env::var(k))?)
    }

    /// Log the effective configuration. Header values are not logged.
    pub fn log_startup(&self) {
        let header_names: Vec<&str> = self.headers.keys().map(|k| k.as_str()).collect();
        info!(
            bootstrap_servers = %self.kafka.bootstrap_servers,
            topic = %self.kafka.topic,
            connect_timeout_ms = self.kafka.connect_timeout.as_millis() as u64,
            endpoint = %self.endpoint,
            method = %self.method,
            headers = ?header_names,
            interval_ms = self.interval.as_millis() as u64,
            request_timeout_ms = ?self.request_timeout.map(|t| t.as_millis() as u64),
            metrics_addr = ?self.metrics_addr,
            "ingestor configuration"
        );
    }
}

/// Configuration of the `metric-collector` binary.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub kafka: KafkaConfig,
    pub group_id: String,
    pub spec: ExtractionSpec,
    /// The insert statement, already checked against `spec`.
    pub insert: PreparedInsert,
    pub connection_string: String,
    pub metrics_addr: Option<SocketAddr>,
}

impl CollectorConfig {
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let kafka = KafkaConfig::from_config_map(config, Some(DEFAULT_CONNECT_TIMEOUT))?;
        let group_id = required(config, KAFKA_GROUP_ID)?;
        let spec = ExtractionSpec::from_json(&required(config, JSON_POINTER_EXTRACTORS)?)?;
        let connection_string = required(config, POSTGRESQL_CONNECTION_STRING)?;

        // Presence alone enables the timestamp, so an empty value is
        // rejected by the placeholder check rather than ignored.
        let timestamp_field = config.get(ADD_TIMESTAMP).map(|s| s.trim().to_string());
        let insert = InsertTemplate::parse(&required(config, POSTGRESQL_INSERT_STATEMENT)?)?
            .prepare(&spec, timestamp_field)?;

        Ok(Self {
            kafka,
            group_id,
            spec,
            insert,
            connection_string,
            metrics_addr: parse_metrics_addr(config)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config_map(&read_keys(COLLECTOR_KEYS, |k| std::env::var(k))?)
    }

    pub fn log_startup(&self) {
        let fields: Vec<&str> = self.spec.field_names().collect();
        info!(
            bootstrap_servers = %self.kafka.bootstrap_servers,
            topic = %self.kafka.topic,
            group_id = %self.group_id,
            connect_timeout_ms = self.kafka.connect_timeout.as_millis() as u64,
            fields = ?fields,
            statement = %self.insert.sql(),
            timestamp_field = ?self.insert.timestamp_field(),
            database = %redact_connection_string(&self.connection_string),
            metrics_addr = ?self.metrics_addr,
            "collector configuration"
        );
    }
}
