//! Request handling helpers.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every inbound request
//! - Validate client bodies before anything reaches the dispatcher
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Reads and deletes ignore any body; writes need valid JSON or nothing

use axum::{
    body::Bytes,
    http::{HeaderName, Method, Request, StatusCode},
};
use serde_json::Value;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::response::Reply;

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates a UUID v4 per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Read the request ID set by the request-id layer.
pub fn request_id<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Decode a client body into the payload forwarded upstream.
pub fn parse_client_body(method: &Method, bytes: &Bytes) -> Result<Option<Value>, Reply> {
    if *method != Method::POST && *method != Method::PUT {
        return Ok(None);
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| Reply::error(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e)))
}
