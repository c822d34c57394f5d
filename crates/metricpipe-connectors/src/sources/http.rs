//! HTTP metric source.
//!
//! Issues one request per call against a fixed endpoint with a fixed verb
//! and header set, and returns the status and full body. The body is never
//! inspected.
//!
//! ## Configuration
//!
//! | Variable          | Description                                     | Default    |
//! |-------------------|-------------------------------------------------|------------|
//! | `METRIC_ENDPOINT` | URL to poll                                     | required   |
//! | `METRIC_METHOD`   | `GET` `PUT` `POST` `DELETE` `PATCH` `OPTIONS` `HEAD` | required |
//! | `METRIC_HEADERS`  | JSON object of header name to value             | required   |
//! | `METRIC_TIMEOUT`  | Per-request timeout in milliseconds             | no timeout |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::error::{PipelineError, Result};
use crate::traits::{MetricFetcher, MetricResponse};

/// Parse an HTTP verb, case-insensitively.
///
/// Only the verbs the ingestor supports are accepted; anything else is a
/// configuration error rather than an extension method.
pub fn parse_method(s: &str) -> Result<Method> {
    match s.trim().to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "PUT" => Ok(Method::PUT),
        "POST" => Ok(Method::POST),
        "DELETE" => Ok(Method::DELETE),
        "PATCH" => Ok(Method::PATCH),
        "OPTIONS" => Ok(Method::OPTIONS),
        "HEAD" => Ok(Method::HEAD),
        other => Err(PipelineError::Config(format!(
            "invalid HTTP method '{}'",
            other
        ))),
    }
}

/// Parse a JSON object of header names to string values.
pub fn parse_headers(json: &str) -> Result<HeaderMap> {
    let raw: HashMap<String, String> = serde_json::from_str(json)
        .map_err(|e| PipelineError::Config(format!("invalid METRIC_HEADERS: {}", e)))?;

    let mut headers = HeaderMap::with_capacity(raw.len());
    for (name, value) in raw {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PipelineError::Config(format!("invalid header name '{}': {}", name, e)))?;
        let header_value = HeaderValue::from_str(&value).map_err(|e| {
            PipelineError::Config(format!("invalid value for header '{}': {}", name, e))
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Parse and check the endpoint URL.
pub fn parse_endpoint(s: &str) -> Result<Url> {
    let url = Url::parse(s)
        .map_err(|e| PipelineError::Config(format!("invalid METRIC_ENDPOINT '{}': {}", s, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(PipelineError::Config(format!(
            "METRIC_ENDPOINT must be http or https, got '{}'",
            other
        ))),
    }
}

/// Polls one HTTP endpoint.
pub struct HttpMetricSource {
    endpoint: Url,
    method: Method,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl HttpMetricSource {
    /// Build a source with its own client. `timeout` bounds each request
    /// end to end; `None` waits as long as the endpoint takes.
    pub fn new(
        endpoint: Url,
        method: Method,
        headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(endpoint, method, headers, client))
    }

    /// Create with an injected reqwest client.
    pub fn with_client(
        endpoint: Url,
        method: Method,
        headers: HeaderMap,
        client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint,
            method,
            headers,
            client,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl MetricFetcher for HttpMetricSource {
    async fn fetch(&self) -> Result<MetricResponse> {
        let response = self
            .client
            .request(self.method.clone(), self.endpoint.clone())
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| PipelineError::Http(format!("request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            PipelineError::Http(format!("reading body from {} failed: {}", self.endpoint, e))
        })?;

        Ok(MetricResponse { status, body })
    }

    fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::{any, get};
    use axum::Router;
    use bytes::Bytes;
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn url(addr: SocketAddr, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", addr, path)).unwrap()
    }

    // ---------------------------------------------------------------
    // Method parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_method_case_insensitive() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("Post").unwrap(), Method::POST);
        assert_eq!(parse_method("HEAD").unwrap(), Method::HEAD);
        assert_eq!(parse_method("options").unwrap(), Method::OPTIONS);
    }

    #[test]
    fn test_parse_method_rejects_unknown() {
        let err = parse_method("FETCH").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("FETCH"));
        assert!(parse_method("TRACE").is_err());
        assert!(parse_method("").is_err());
    }

    // ---------------------------------------------------------------
    // Header parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_headers() {
        let headers =
            parse_headers(r#"{"Accept": "application/json", "X-Api-Key": "secret"}"#).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers["x-api-key"], "secret");
    }

    #[test]
    fn test_parse_headers_empty_object() {
        assert!(parse_headers("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_headers_rejects_non_string_values() {
        assert!(parse_headers(r#"{"X-Retries": 3}"#).is_err());
    }

    #[test]
    fn test_parse_headers_rejects_bad_name() {
        let err = parse_headers(r#"{"bad name": "v"}"#).unwrap_err();
        assert!(err.to_string().contains("bad name"));
    }

    #[test]
    fn test_parse_headers_rejects_non_object() {
        assert!(parse_headers(r#"["Accept"]"#).is_err());
    }

    // ---------------------------------------------------------------
    // Endpoint parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_endpoint() {
        let url = parse_endpoint("http://localhost:8080/metrics").unwrap();
        assert_eq!(url.path(), "/metrics");
        assert!(parse_endpoint("not a url").is_err());
        assert!(parse_endpoint("ftp://host/file").is_err());
    }

    // ---------------------------------------------------------------
    // Fetching
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_fetch_sends_method_and_headers() {
        let router = Router::new().route(
            "/metrics",
            any(|method: axum::http::Method, headers: AxumHeaders| async move {
                let key = headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string();
                format!("{} {}", method, key)
            }),
        );
        let addr = serve(router).await;

        let source = HttpMetricSource::new(
            url(addr, "/metrics"),
            Method::PUT,
            parse_headers(r#"{"X-Api-Key": "k1"}"#).unwrap(),
            None,
        )
        .unwrap();

        let response = source.fetch().await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from("PUT k1"));
    }

    #[tokio::test]
    async fn test_fetch_returns_error_status_with_body() {
        let router = Router::new().route(
            "/metrics",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, r#"{"error":"down"}"#) }),
        );
        let addr = serve(router).await;

        let source =
            HttpMetricSource::new(url(addr, "/metrics"), Method::GET, HeaderMap::new(), None)
                .unwrap();
        let response = source.fetch().await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, Bytes::from(r#"{"error":"down"}"#));
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_http_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source =
            HttpMetricSource::new(url(addr, "/"), Method::GET, HeaderMap::new(), None).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, PipelineError::Http(_)));
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_http_error() {
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = serve(router).await;

        let source = HttpMetricSource::new(
            url(addr, "/slow"),
            Method::GET,
            HeaderMap::new(),
            Some(Duration::from_millis(100)),
        )
        .unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, PipelineError::Http(_)));
    }

    #[test]
    fn test_endpoint_accessor() {
        let source = HttpMetricSource::with_client(
            parse_endpoint("http://example.com/m").unwrap(),
            Method::GET,
            HeaderMap::new(),
            reqwest::Client::new(),
        );
        assert_eq!(source.endpoint(), "http://example.com/m");
        assert_eq!(source.method(), &Method::GET);
        assert!(source.headers().is_empty());
    }
}
