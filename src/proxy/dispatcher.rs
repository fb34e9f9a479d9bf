//! Per-request routing decision: forward, queue, serve from cache, or fail.

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::health::LivenessMonitor;
use crate::http::response::{ApiStatus, Envelope, Reply};
use crate::proxy::forwarder::{ForwardOutcome, Forwarder};
use crate::store::{DurableQueue, ResponseCache, WriteMethod};

/// What the dispatcher did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Forwarded,
    Rejected,
    Queued,
    CacheHit,
    CacheMiss,
    Failed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Forwarded => "forwarded",
            Disposition::Rejected => "rejected",
            Disposition::Queued => "queued",
            Disposition::CacheHit => "cache_hit",
            Disposition::CacheMiss => "cache_miss",
            Disposition::Failed => "failed",
        }
    }
}

/// Dispatcher answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub reply: Reply,
    pub disposition: Disposition,
}

impl Dispatched {
    fn new(disposition: Disposition, reply: Reply) -> Self {
        Self { reply, disposition }
    }
}

pub struct Dispatcher {
    liveness: Arc<LivenessMonitor>,
    forwarder: Forwarder,
    queue: DurableQueue,
    cache: ResponseCache,
}

impl Dispatcher {
    pub fn new(
        liveness: Arc<LivenessMonitor>,
        forwarder: Forwarder,
        queue: DurableQueue,
        cache: ResponseCache,
    ) -> Self {
        Self {
            liveness,
            forwarder,
            queue,
            cache,
        }
    }

    /// Handle one client request against the upstream `path`.
    pub async fn handle(&self, method: Method, path: &str, body: Option<Value>) -> Dispatched {
        let write = WriteMethod::try_from(&method).ok();
        if method != Method::GET && write.is_none() {
            return Dispatched::new(
                Disposition::Failed,
                Reply::error(StatusCode::METHOD_NOT_ALLOWED, format!("Method {} not supported", method)),
            );
        }

        if let Err(e) = self.forwarder.uri_for(path) {
            tracing::warn!(path = %path, error = %e, "Rejected malformed request path");
            return Dispatched::new(
                Disposition::Failed,
                Reply::error(StatusCode::BAD_REQUEST, "Invalid request path"),
            );
        }

        if self.liveness.is_upstream_alive().await {
            match self.forwarder.forward(method.clone(), path, body.as_ref()).await {
                Ok(ForwardOutcome::Success { body: response, .. }) => {
                    let response = response.unwrap_or(Value::Null);
                    if method == Method::GET {
                        if let Err(e) = self.cache.put_default(path, &response).await {
                            tracing::warn!(path = %path, error = %e, "Failed to cache upstream response");
                        }
                    }
                    return Dispatched::new(Disposition::Forwarded, Reply::new(StatusCode::OK, response));
                }
                Ok(ForwardOutcome::Rejected { status, body: response }) => {
                    let response = response.unwrap_or_else(|| {
                        Envelope::error(format!("Upstream rejected request with status {}", status.as_u16()))
                            .into_value()
                    });
                    return Dispatched::new(Disposition::Rejected, Reply::new(status, response));
                }
                Ok(ForwardOutcome::Unreachable(reason)) => {
                    tracing::debug!(path = %path, reason = %reason, "Forward failed, falling back");
                }
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "Failed to build upstream request");
                    return Dispatched::new(
                        Disposition::Failed,
                        Reply::error(StatusCode::BAD_REQUEST, "Invalid request"),
                    );
                }
            }
        }

        match write {
            Some(write) => self.enqueue(write, path, body.as_ref()).await,
            None => self.serve_cached(path).await,
        }
    }

    async fn enqueue(&self, method: WriteMethod, path: &str, body: Option<&Value>) -> Dispatched {
        match self.queue.enqueue(method, path, body).await {
            Ok(id) => Dispatched::new(
                Disposition::Queued,
                Reply::envelope(
                    StatusCode::ACCEPTED,
                    Envelope::new(ApiStatus::Queued)
                        .message("Upstream unavailable. Request queued for later processing.")
                        .data(json!({ "id": id }))
                        .upstream_offline(),
                ),
            ),
            Err(e) => {
                tracing::error!(method = method.as_str(), path = %path, error = %e, "Failed to queue write");
                Dispatched::new(
                    Disposition::Failed,
                    Reply::error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Upstream unavailable and the request could not be queued",
                    ),
                )
            }
        }
    }

    async fn serve_cached(&self, path: &str) -> Dispatched {
        match self.cache.get(path).await {
            Ok(Some(payload)) => {
                let data = match payload {
                    Value::Object(mut map) if map.contains_key("data") => {
                        map.remove("data").unwrap_or(Value::Null)
                    }
                    other => other,
                };
                Dispatched::new(
                    Disposition::CacheHit,
                    Reply::envelope(
                        StatusCode::OK,
                        Envelope::success(data)
                            .cached()
                            .message("Data from local cache (upstream offline)"),
                    ),
                )
            }
            Ok(None) => Dispatched::new(
                Disposition::CacheMiss,
                Reply::envelope(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Envelope::error("Upstream unavailable. No cached data available.").data(json!({})),
                ),
            ),
            Err(e) => {
                tracing::error!(path = %path, error = %e, "Failed to read response cache");
                Dispatched::new(
                    Disposition::Failed,
                    Reply::error(StatusCode::INTERNAL_SERVER_ERROR, "Local cache unavailable"),
                )
            }
        }
    }
}
