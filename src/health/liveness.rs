//! Rate-limited upstream liveness checks.
//!
//! # Responsibilities
//! - Answer "is the upstream reachable?" for every request and sync cycle
//! - Probe the upstream at most once per cache window
//! - Log one event per verdict flip

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::health::state::{Clock, LivenessState, StatusChange, SystemClock};
use crate::observability::metrics;
use crate::proxy::Forwarder;

/// Last published verdict, readable without taking the probe lock.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessSnapshot {
    pub alive: bool,
    pub checked_at: Option<DateTime<Utc>>,
}

pub struct LivenessMonitor {
    forwarder: Forwarder,
    health_path: String,
    probe_timeout: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<LivenessState>,
    snapshot: ArcSwap<LivenessSnapshot>,
    probes: AtomicU64,
}

impl LivenessMonitor {
    pub fn new(
        forwarder: Forwarder,
        health_path: impl Into<String>,
        cache_ttl: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self::with_clock(forwarder, health_path, cache_ttl, probe_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        forwarder: Forwarder,
        health_path: impl Into<String>,
        cache_ttl: Duration,
        probe_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            forwarder,
            health_path: health_path.into(),
            probe_timeout,
            clock,
            state: Mutex::new(LivenessState::new(cache_ttl)),
            snapshot: ArcSwap::from_pointee(LivenessSnapshot {
                alive: false,
                checked_at: None,
            }),
            probes: AtomicU64::new(0),
        }
    }

    /// Whether the upstream is reachable.
    ///
    /// Reuses the cached verdict while it is fresh. Otherwise probes once;
    /// concurrent callers wait for that probe instead of issuing their own.
    /// Never fails: any probe error means "not alive".
    pub async fn is_upstream_alive(&self) -> bool {
        let mut state = self.state.lock().await;
        if let Some(alive) = state.fresh_verdict(self.clock.now()) {
            return alive;
        }

        let alive = self.forwarder.probe(&self.health_path, self.probe_timeout).await;
        self.probes.fetch_add(1, Ordering::Relaxed);

        let change = state.record(self.clock.now(), alive);
        self.snapshot.store(Arc::new(LivenessSnapshot {
            alive,
            checked_at: Some(Utc::now()),
        }));
        drop(state);

        metrics::record_upstream_alive(alive);
        match change {
            Some(StatusChange::BecameAlive) => {
                tracing::info!(upstream = %self.forwarder.base_url(), "Upstream became alive");
                metrics::record_upstream_transition(true);
            }
            Some(StatusChange::BecameDead) => {
                tracing::warn!(upstream = %self.forwarder.base_url(), "Upstream became dead");
                metrics::record_upstream_transition(false);
            }
            None => {}
        }

        alive
    }

    /// The most recent verdict without probing.
    pub fn snapshot(&self) -> Arc<LivenessSnapshot> {
        self.snapshot.load_full()
    }

    /// Number of probes issued so far.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::ManualClock;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Probe {
        hits: Arc<AtomicUsize>,
        healthy: Arc<AtomicBool>,
    }

    async fn status(State(probe): State<Probe>) -> StatusCode {
        probe.hits.fetch_add(1, Ordering::SeqCst);
        if probe.healthy.load(Ordering::SeqCst) {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    async fn spawn_health_endpoint(probe: Probe) -> SocketAddr {
        let app = Router::new().route("/api/status", get(status)).with_state(probe);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn monitor(addr: SocketAddr, clock: Arc<ManualClock>) -> LivenessMonitor {
        let forwarder = Forwarder::new(&format!("http://{}/api", addr), Duration::from_millis(500));
        LivenessMonitor::with_clock(
            forwarder,
            "/status",
            Duration::from_secs(3),
            Duration::from_millis(500),
            clock,
        )
    }

    #[tokio::test]
    async fn test_probe_at_most_once_per_window() {
        let probe = Probe::default();
        probe.healthy.store(true, Ordering::SeqCst);
        let addr = spawn_health_endpoint(probe.clone()).await;
        let clock = Arc::new(ManualClock::new());
        let monitor = Arc::new(monitor(addr, clock.clone()));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let monitor = monitor.clone();
            handles.push(tokio::spawn(async move { monitor.is_upstream_alive().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(probe.hits.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.probe_count(), 1);

        clock.advance(Duration::from_secs(2));
        assert!(monitor.is_upstream_alive().await);
        assert_eq!(probe.hits.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        assert!(monitor.is_upstream_alive().await);
        assert_eq!(probe.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_success_status_is_dead() {
        let probe = Probe::default();
        let addr = spawn_health_endpoint(probe.clone()).await;
        let clock = Arc::new(ManualClock::new());
        let monitor = monitor(addr, clock.clone());

        assert!(!monitor.is_upstream_alive().await);
        assert!(!monitor.snapshot().alive);

        probe.healthy.store(true, Ordering::SeqCst);
        assert!(!monitor.is_upstream_alive().await, "cached verdict is reused");

        clock.advance(Duration::from_secs(3));
        assert!(monitor.is_upstream_alive().await);
        let snapshot = monitor.snapshot();
        assert!(snapshot.alive);
        assert!(snapshot.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_dead() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor = monitor(addr, Arc::new(ManualClock::new()));
        assert!(!monitor.is_upstream_alive().await);
        assert_eq!(monitor.probe_count(), 1);
    }
}
