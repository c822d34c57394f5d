//! `/metrics` scrape endpoint for the ingestor and collector.

use std::net::SocketAddr;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics::REGISTRY;

pub const METRICS_PATH: &str = "/metrics";

/// Encode every registered metric in the Prometheus text format.
pub fn render() -> prometheus::Result<Vec<u8>> {
    let mut out = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut out)?;
    Ok(out)
}

async fn scrape() -> Response {
    match render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn router() -> Router {
    Router::new().route(METRICS_PATH, get(scrape))
}

/// Serve [`METRICS_PATH`] on `addr` as a background task.
///
/// Bind failures are returned to the caller; errors after the listener is up
/// are logged and end the task without affecting the service loop.
pub async fn spawn_metrics_server(addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = METRICS_PATH, "metrics exporter listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            error!(error = %e, "metrics exporter stopped");
        }
    }))
}
