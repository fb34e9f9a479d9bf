//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, outcome
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upstream_alive` (gauge): 1=reachable, 0=unreachable
//! - `proxy_upstream_transitions_total` (counter): liveness flips
//! - `proxy_queue_events_total` (counter): enqueued / synced / failed
//! - `proxy_cache_events_total` (counter): hit / miss / store
//! - `proxy_sync_items_total` (counter): drained entries by result
//!
//! Without an installed recorder every call is a no-op.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished client request.
pub fn record_request(method: &str, status: u16, outcome: &'static str, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status,
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record the latest liveness verdict.
pub fn record_upstream_alive(alive: bool) {
    metrics::gauge!("proxy_upstream_alive").set(if alive { 1.0 } else { 0.0 });
}

/// Record an edge in the liveness verdict.
pub fn record_upstream_transition(alive: bool) {
    let to = if alive { "alive" } else { "dead" };
    metrics::counter!("proxy_upstream_transitions_total", "to" => to).increment(1);
}

pub fn record_queue_event(event: &'static str) {
    metrics::counter!("proxy_queue_events_total", "event" => event).increment(1);
}

pub fn record_cache_event(event: &'static str) {
    metrics::counter!("proxy_cache_events_total", "event" => event).increment(1);
}

/// Record the outcome of one drain pass.
pub fn record_sync(synced: usize, failed: usize, skipped: usize) {
    metrics::counter!("proxy_sync_items_total", "result" => "synced").increment(synced as u64);
    metrics::counter!("proxy_sync_items_total", "result" => "failed").increment(failed as u64);
    metrics::counter!("proxy_sync_items_total", "result" => "skipped").increment(skipped as u64);
}

/// Record the number of entries waiting for replay.
pub fn record_queue_depth(depth: u64) {
    metrics::gauge!("proxy_queue_depth").set(depth as f64);
}
