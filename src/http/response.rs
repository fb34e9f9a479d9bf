//! Response envelope.
//!
//! Every answer the proxy produces itself uses
//! `{status: "success"|"error"|"queued", message?, data?}`. Forwarded
//! upstream bodies are passed through unchanged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

/// Envelope status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
    Queued,
}

/// The proxy's own response body.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub status: ApiStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<&'static str>,
}

impl Envelope {
    pub fn new(status: ApiStatus) -> Self {
        Self {
            status,
            message: None,
            data: None,
            cached: None,
            upstream_status: None,
        }
    }

    pub fn success(data: Value) -> Self {
        Self::new(ApiStatus::Success).data(data)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ApiStatus::Error).message(message)
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn cached(mut self) -> Self {
        self.cached = Some(true);
        self
    }

    pub fn upstream_offline(mut self) -> Self {
        self.upstream_status = Some("offline");
        self
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A status code plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    pub fn envelope(status: StatusCode, envelope: Envelope) -> Self {
        Self::new(status, envelope.into_value())
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::envelope(status, Envelope::error(message))
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
