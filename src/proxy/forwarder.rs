//! Upstream forwarding.
//!
//! # Responsibilities
//! - Turn (method, path, body) into a call against the upstream base URL
//! - Bound every call by a short timeout
//! - Classify the result: success, application rejection, or unreachable
//!
//! # Design Decisions
//! - Only `Unreachable` triggers queue/cache fallback; rejections are
//!   returned to the caller because replaying them would fail forever
//! - Transport failures are expected during outages and are not logged
//!   as errors

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time;

/// Largest upstream body the proxy will buffer.
const MAX_UPSTREAM_BODY: usize = 8 * 1024 * 1024;

/// Why the upstream could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// No complete response within the deadline.
    Timeout,
    /// Connection could not be established.
    Refused,
    /// Connection dropped mid-exchange.
    Reset,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportFailure::Timeout => "timeout",
            TransportFailure::Refused => "refused",
            TransportFailure::Reset => "reset",
        })
    }
}

/// Result of a forwarded call.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardOutcome {
    /// Upstream answered with status < 400.
    Success { status: StatusCode, body: Option<Value> },
    /// Upstream answered with status >= 400.
    Rejected { status: StatusCode, body: Option<Value> },
    /// Upstream never answered.
    Unreachable(TransportFailure),
}

impl ForwardOutcome {
    pub fn ok(&self) -> bool {
        matches!(self, ForwardOutcome::Success { .. })
    }

    /// The upstream's body, if it answered with one.
    pub fn response(&self) -> Option<&Value> {
        match self {
            ForwardOutcome::Success { body, .. } | ForwardOutcome::Rejected { body, .. } => {
                body.as_ref()
            }
            ForwardOutcome::Unreachable(_) => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, ForwardOutcome::Unreachable(_))
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ForwardOutcome::Success { .. } => "success",
            ForwardOutcome::Rejected { .. } => "rejected",
            ForwardOutcome::Unreachable(_) => "unreachable",
        }
    }
}

/// The request could not be built; nothing was sent.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream uri '{uri}': {source}")]
    InvalidUri {
        uri: String,
        source: axum::http::uri::InvalidUri,
    },
    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),
}

/// Client for the upstream configuration service.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forwarder")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Forwarder {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward a request with the default timeout.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ForwardOutcome, ForwardError> {
        let outcome = self.exchange(method.clone(), path, body, self.timeout).await?;

        match &outcome {
            ForwardOutcome::Rejected { status, body } => {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    status = %status,
                    body = ?body,
                    "Upstream rejected request"
                );
            }
            ForwardOutcome::Unreachable(reason) => {
                tracing::debug!(method = %method, path = %path, reason = %reason, "Upstream unreachable");
            }
            ForwardOutcome::Success { .. } => {}
        }

        Ok(outcome)
    }

    /// GET `path` and report whether the upstream answered 2xx in time.
    pub async fn probe(&self, path: &str, timeout: Duration) -> bool {
        match self.exchange(Method::GET, path, None, timeout).await {
            Ok(ForwardOutcome::Success { status, .. }) => status.is_success(),
            Ok(_) => false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build health probe");
                false
            }
        }
    }

    /// Build the upstream URI for `path` without sending anything.
    pub fn uri_for(&self, path: &str) -> Result<Uri, ForwardError> {
        let uri = format!("{}{}", self.base_url, path);
        uri.parse::<Uri>()
            .map_err(|source| ForwardError::InvalidUri { uri, source })
    }

    async fn exchange(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<ForwardOutcome, ForwardError> {
        let uri = self.uri_for(path)?;
        let payload = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "buffer-proxy")
            .body(payload)?;

        let call = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| if e.is_connect() { TransportFailure::Refused } else { TransportFailure::Reset })?;
            let status = response.status();
            let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_UPSTREAM_BODY)
                .await
                .map_err(|_| TransportFailure::Reset)?;
            Ok::<_, TransportFailure>((status, bytes))
        };

        let (status, bytes) = match time::timeout(timeout, call).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(reason)) => return Ok(ForwardOutcome::Unreachable(reason)),
            Err(_) => return Ok(ForwardOutcome::Unreachable(TransportFailure::Timeout)),
        };

        let body = parse_body(&bytes);
        if status.is_client_error() || status.is_server_error() {
            Ok(ForwardOutcome::Rejected { status, body })
        } else {
            Ok(ForwardOutcome::Success { status, body })
        }
    }
}

/// Empty bodies become `None`; non-JSON text is kept as a string.
fn parse_body(bytes: &Bytes) -> Option<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Json, routing::get, Router};
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_upstream() -> SocketAddr {
        let app = Router::new()
            .route("/api/status", get(|| async { Json(json!({"status": "success"})) }))
            .route(
                "/api/limits",
                get(|| async { Json(json!({"status": "success", "data": {}})) }).post(|| async {
                    (
                        StatusCode::CONFLICT,
                        Json(json!({"status": "error", "message": "Application 'a' already exists"})),
                    )
                }),
            )
            .route("/api/empty", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route(
                "/api/moved",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/api/limits")]) })
                    .put(|| async { StatusCode::NOT_MODIFIED }),
            )
            .route(
                "/api/slow",
                get(|| async {
                    time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_success_is_classified() {
        let addr = spawn_upstream().await;
        let forwarder = Forwarder::new(&format!("http://{}/api/", addr), Duration::from_millis(500));

        let outcome = forwarder.forward(Method::GET, "/limits", None).await.unwrap();
        assert!(outcome.ok());
        assert_eq!(outcome.response(), Some(&json!({"status": "success", "data": {}})));
    }

    #[tokio::test]
    async fn test_redirect_statuses_are_success() {
        let addr = spawn_upstream().await;
        let forwarder = Forwarder::new(&format!("http://{}/api", addr), Duration::from_millis(500));

        let outcome = forwarder
            .forward(Method::PUT, "/moved", Some(&json!({"limits": {}})))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ForwardOutcome::Success { status: StatusCode::NOT_MODIFIED, body: None }
        );

        let outcome = forwarder.forward(Method::GET, "/moved", None).await.unwrap();
        assert!(matches!(outcome, ForwardOutcome::Success { status, .. } if status == StatusCode::FOUND));

        assert!(!forwarder.probe("/moved", Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_rejection_keeps_body() {
        let addr = spawn_upstream().await;
        let forwarder = Forwarder::new(&format!("http://{}/api", addr), Duration::from_millis(500));

        let outcome = forwarder
            .forward(Method::POST, "/limits", Some(&json!({"app_name": "a", "limits": {}})))
            .await
            .unwrap();
        match outcome {
            ForwardOutcome::Rejected { status, body } => {
                assert_eq!(status, StatusCode::CONFLICT);
                assert_eq!(body.unwrap()["status"], "error");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejection_without_body() {
        let addr = spawn_upstream().await;
        let forwarder = Forwarder::new(&format!("http://{}/api", addr), Duration::from_millis(500));

        let outcome = forwarder.forward(Method::GET, "/empty", None).await.unwrap();
        assert_eq!(
            outcome,
            ForwardOutcome::Rejected { status: StatusCode::INTERNAL_SERVER_ERROR, body: None }
        );
        assert!(!outcome.is_unreachable());
    }

    #[tokio::test]
    async fn test_timeout_is_unreachable() {
        let addr = spawn_upstream().await;
        let forwarder = Forwarder::new(&format!("http://{}/api", addr), Duration::from_millis(100));

        let outcome = forwarder.forward(Method::GET, "/slow", None).await.unwrap();
        assert_eq!(outcome, ForwardOutcome::Unreachable(TransportFailure::Timeout));
        assert!(outcome.response().is_none());
    }

    #[tokio::test]
    async fn test_refused_is_unreachable() {
        let addr = closed_port().await;
        let forwarder = Forwarder::new(&format!("http://{}/api", addr), Duration::from_millis(500));

        let outcome = forwarder.forward(Method::PUT, "/limits/foo", Some(&json!({}))).await.unwrap();
        assert_eq!(outcome, ForwardOutcome::Unreachable(TransportFailure::Refused));
    }

    #[tokio::test]
    async fn test_probe() {
        let addr = spawn_upstream().await;
        let forwarder = Forwarder::new(&format!("http://{}/api", addr), Duration::from_millis(500));
        assert!(forwarder.probe("/status", Duration::from_millis(500)).await);
        assert!(!forwarder.probe("/empty", Duration::from_millis(500)).await);
        assert!(!forwarder.probe("/slow", Duration::from_millis(100)).await);

        let dead = Forwarder::new(&format!("http://{}/api", closed_port().await), Duration::from_millis(500));
        assert!(!dead.probe("/status", Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_invalid_path_is_an_error() {
        let forwarder = Forwarder::new("http://127.0.0.1:1/api", Duration::from_millis(100));
        let err = forwarder.forward(Method::GET, "/bad path", None).await.unwrap_err();
        assert!(matches!(err, ForwardError::InvalidUri { .. }));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::from_static(b"")), None);
        assert_eq!(parse_body(&Bytes::from_static(b"  \n")), None);
        assert_eq!(parse_body(&Bytes::from_static(b"{\"a\":1}")), Some(json!({"a": 1})));
        assert_eq!(
            parse_body(&Bytes::from_static(b"Not Found")),
            Some(Value::String("Not Found".into()))
        );
    }
}
