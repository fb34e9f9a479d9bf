//! Configuration validation.
//!
//! Serde handles the syntactic checks. This pass checks values: addresses
//! parse, the upstream URL is plain HTTP, durations are non-zero. Every
//! problem is reported, not just the first.

use std::net::SocketAddr;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if !config.listener.api_prefix.is_empty() && !config.listener.api_prefix.starts_with('/') {
        errors.push(ValidationError::new("listener.api_prefix", "must start with '/'"));
    }

    match Url::parse(&config.upstream.base_url) {
        Ok(url) if url.scheme() != "http" => errors.push(ValidationError::new(
            "upstream.base_url",
            format!("unsupported scheme '{}', only http is supported", url.scheme()),
        )),
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("upstream.base_url", e.to_string())),
    }

    if !config.upstream.health_path.starts_with('/') {
        errors.push(ValidationError::new("upstream.health_path", "must start with '/'"));
    }

    if config.upstream.request_timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.request_timeout_ms", "must be greater than 0"));
    }

    if config.liveness.probe_timeout_ms == 0 {
        errors.push(ValidationError::new("liveness.probe_timeout_ms", "must be greater than 0"));
    }

    if config.sync.interval_secs == 0 {
        errors.push(ValidationError::new("sync.interval_secs", "must be greater than 0"));
    }

    for path in &config.sync.hot_paths {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(
                "sync.hot_paths",
                format!("'{}' must start with '/'", path),
            ));
        }
    }

    if config.sync.max_retries == Some(0) {
        errors.push(ValidationError::new("sync.max_retries", "must be at least 1 when set"));
    }

    if config.store.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("store.path", "must not be empty"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
