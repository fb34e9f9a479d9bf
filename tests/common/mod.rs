//! Shared utilities for integration tests: a mock configuration service and
//! proxy wiring helpers.
#![allow(dead_code)]

use axum::{
    extract::{Path, Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

use buffer_proxy::config::ProxyConfig;
use buffer_proxy::health::ManualClock;
use buffer_proxy::{HttpServer, Relay, Shutdown};

/// Forwarder and probe timeout used by every test proxy.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_millis(200);

/// How long an "offline" upstream stalls before answering 503.
const OFFLINE_STALL: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct MockState {
    online: AtomicBool,
    status_hits: AtomicU64,
    limits: Mutex<BTreeMap<String, Value>>,
    applied: Mutex<Vec<String>>,
}

/// In-process stand-in for the configuration service, mounted under `/api`.
///
/// Offline means every request stalls past [`UPSTREAM_TIMEOUT`] and is then
/// refused without being applied.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        state.online.store(true, Ordering::SeqCst);

        let api = Router::new()
            .route("/status", get(status))
            .route("/limits", get(list_limits).post(create_limit))
            .route(
                "/limits/{app}",
                get(get_limit).put(update_limit).delete(delete_limit),
            )
            .fallback(generic);

        let app = Router::new()
            .nest("/api", api)
            .layer(middleware::from_fn_with_state(state.clone(), gate))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn set_online(&self, online: bool) {
        self.state.online.store(online, Ordering::SeqCst);
    }

    pub fn status_hits(&self) -> u64 {
        self.state.status_hits.load(Ordering::SeqCst)
    }

    pub fn limit(&self, app: &str) -> Option<Value> {
        self.state.limits.lock().unwrap().get(app).cloned()
    }

    pub fn insert_limit(&self, app: &str, limits: Value) {
        self.state.limits.lock().unwrap().insert(app.to_string(), limits);
    }

    /// Applied writes as "METHOD /path", in arrival order.
    pub fn applied(&self) -> Vec<String> {
        self.state.applied.lock().unwrap().clone()
    }
}

async fn gate(State(state): State<Arc<MockState>>, request: Request, next: Next) -> Response {
    if request.uri().path() == "/api/status" {
        state.status_hits.fetch_add(1, Ordering::SeqCst);
    }
    if !state.online.load(Ordering::SeqCst) {
        tokio::time::sleep(OFFLINE_STALL).await;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    if method != Method::GET && response.status().is_success() {
        state.applied.lock().unwrap().push(format!("{} {}", method, path));
    }
    response
}

async fn status() -> Json<Value> {
    Json(json!({"status": "success", "data": {"status": "running"}}))
}

async fn list_limits(State(state): State<Arc<MockState>>) -> Json<Value> {
    let limits = state.limits.lock().unwrap().clone();
    Json(json!({"status": "success", "data": limits}))
}

async fn create_limit(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let Some(app) = body["app_name"].as_str() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "app_name is required"})),
        )
            .into_response();
    };

    let mut limits = state.limits.lock().unwrap();
    if limits.contains_key(app) {
        return (
            StatusCode::CONFLICT,
            Json(json!({"status": "error", "message": format!("Limit for {} already exists", app)})),
        )
            .into_response();
    }
    limits.insert(app.to_string(), body["limits"].clone());
    (
        StatusCode::CREATED,
        Json(json!({"status": "success", "message": "Limit created"})),
    )
        .into_response()
}

async fn get_limit(State(state): State<Arc<MockState>>, Path(app): Path<String>) -> Response {
    match state.limits.lock().unwrap().get(&app) {
        Some(limits) => Json(json!({"status": "success", "data": limits})).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": "Not found"})),
        )
            .into_response(),
    }
}

async fn update_limit(
    State(state): State<Arc<MockState>>,
    Path(app): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.limits.lock().unwrap().insert(app, body["limits"].clone());
    Json(json!({"status": "success", "message": "Limit updated"}))
}

async fn delete_limit(State(state): State<Arc<MockState>>, Path(app): Path<String>) -> Response {
    match state.limits.lock().unwrap().remove(&app) {
        Some(_) => Json(json!({"status": "success", "message": "Limit deleted"})).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": "Not found"})),
        )
            .into_response(),
    }
}

async fn generic() -> Json<Value> {
    Json(json!({"status": "success", "data": {}}))
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Proxy config pointed at `upstream_base`, with a throwaway store and no
/// background sync (tests drive cycles by hand).
pub fn proxy_config(upstream_base: &str, dir: &TempDir) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.base_url = upstream_base.to_string();
    config.upstream.request_timeout_ms = UPSTREAM_TIMEOUT.as_millis() as u64;
    config.liveness.cache_ttl_ms = 0;
    config.liveness.probe_timeout_ms = UPSTREAM_TIMEOUT.as_millis() as u64;
    config.sync.enabled = false;
    config.sync.hot_paths = vec!["/limits".to_string()];
    config.store.path = dir.path().join("request_queue.db");
    config.observability.metrics_enabled = false;
    config
}

/// Components built against a manual clock.
pub fn relay(config: &ProxyConfig) -> (Relay, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let relay = Relay::with_clock(config, clock.clone()).unwrap();
    (relay, clock)
}

/// A running proxy reachable over HTTP.
pub struct RunningProxy {
    pub url: String,
    pub relay: Relay,
    shutdown: Shutdown,
}

impl RunningProxy {
    pub async fn start(config: ProxyConfig) -> Self {
        let relay = Relay::build(&config).unwrap();
        let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{}{}", addr, config.listener.api_prefix);

        let shutdown = Shutdown::new();
        let server = HttpServer::with_relay(config, relay.clone());
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = server.run(listener, rx).await;
        });

        Self { url, relay, shutdown }
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
