//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the client API and the management endpoints
//! - Wire up middleware (request ID, tracing, CORS, timeout) and the body limit
//! - Give timeout and body-limit rejections the JSON error envelope
//! - Hand every client request to the dispatcher
//! - Run the sync worker alongside the listener

use axum::{
    body::{Body, Bytes},
    extract::{rejection::PathRejection, DefaultBodyLimit, OriginalUri, Path, State},
    http::{header, Method, Request, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::ProxyConfig;
use crate::health::LivenessMonitor;
use crate::http::request::{parse_client_body, request_id, UuidRequestId, X_REQUEST_ID};
use crate::http::response::Reply;
use crate::lifecycle::{Relay, StartupError};
use crate::observability::metrics;
use crate::proxy::Dispatcher;
use crate::store::DurableQueue;
use crate::sync::SyncWorker;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub worker: Arc<SyncWorker>,
    pub liveness: Arc<LivenessMonitor>,
    pub queue: DurableQueue,
}

impl From<&Relay> for AppState {
    fn from(relay: &Relay) -> Self {
        Self {
            dispatcher: relay.dispatcher.clone(),
            worker: relay.worker.clone(),
            liveness: relay.liveness.clone(),
            queue: relay.queue.clone(),
        }
    }
}

/// HTTP server for the buffering proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    worker: Arc<SyncWorker>,
}

impl HttpServer {
    /// Open the store and build every component from `config`.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let relay = Relay::build(&config)?;
        Ok(Self::with_relay(config, relay))
    }

    /// Serve an already-built set of components.
    pub fn with_relay(config: ProxyConfig, relay: Relay) -> Self {
        let worker = relay.worker.clone();
        let router = Self::build_router(&config, AppState::from(&relay));
        Self {
            router,
            config,
            worker,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let api = api_routes()
            .merge(admin::routes())
            .method_not_allowed_fallback(method_not_allowed);

        let prefix = config.listener.api_prefix.trim_end_matches('/');
        let app = if prefix.is_empty() {
            Router::new().merge(api)
        } else {
            Router::new().nest(prefix, api)
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    request_id = %request_id(req),
                    method = %req.method(),
                    uri = %req.uri(),
                )
            }))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(cors)
            .layer(middleware::map_response(json_error_body))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));

        app.fallback(not_found)
            .with_state(state)
            .layer(DefaultBodyLimit::max(config.security.max_body_size))
            .layer(middleware)
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            api_prefix = %self.config.listener.api_prefix,
            upstream = %self.config.upstream.base_url,
            "HTTP server starting"
        );

        let worker = if self.config.sync.enabled {
            let rx = shutdown.resubscribe();
            Some(tokio::spawn(self.worker.clone().run(rx)))
        } else {
            tracing::info!("Sync worker disabled");
            None
        };

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;

        if let Some(handle) = worker {
            if served.is_ok() {
                let _ = handle.await;
            } else {
                handle.abort();
            }
        }
        served?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Client API routes, relative to the API prefix.
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/limits", get(relay).post(relay))
        .route("/limits/{app_name}", get(relay).put(relay).delete(relay))
        .route("/limits/{app_name}/{day}", put(relay))
        .route("/exceptions", get(relay).post(relay))
        .route("/exceptions/{date}", get(relay))
        .route("/exceptions/{date}/{app_name}", get(relay).delete(relay))
        .route("/exceptions/{date}/{app_name}/{index}", delete(delete_exception))
        .route("/usage", get(relay))
        .route("/usage/{date}", get(relay))
        .route("/usage/{date}/{app_name}", get(relay).put(relay))
        .route("/config", get(relay).post(relay))
        .route("/status", get(relay))
}

/// Relay one client request. `uri` is already relative to the API prefix.
async fn relay(State(state): State<AppState>, method: Method, uri: Uri, body: Bytes) -> Response {
    let start = Instant::now();
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let body = match parse_client_body(&method, &body) {
        Ok(body) => body,
        Err(reply) => {
            metrics::record_request(method.as_str(), reply.status.as_u16(), "invalid", start);
            return reply.into_response();
        }
    };

    let dispatched = state.dispatcher.handle(method.clone(), path, body).await;
    metrics::record_request(
        method.as_str(),
        dispatched.reply.status.as_u16(),
        dispatched.disposition.as_str(),
        start,
    );
    tracing::debug!(
        path = %path,
        status = dispatched.reply.status.as_u16(),
        disposition = dispatched.disposition.as_str(),
        "Request handled"
    );
    dispatched.reply.into_response()
}

/// Exception removal by position; the index must be a non-negative integer.
async fn delete_exception(
    state: State<AppState>,
    params: Result<Path<(String, String, u32)>, PathRejection>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if let Err(rejection) = params {
        tracing::debug!(uri = %uri, error = %rejection, "Invalid exception index");
        return Reply::error(StatusCode::BAD_REQUEST, "Exception index must be a non-negative integer")
            .into_response();
    }
    relay(state, method, uri, body).await
}

async fn not_found(OriginalUri(uri): OriginalUri) -> Reply {
    Reply::error(StatusCode::NOT_FOUND, format!("Endpoint {} not found", uri.path()))
}

async fn method_not_allowed(method: Method, OriginalUri(uri): OriginalUri) -> Reply {
    Reply::error(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Method {} not allowed for {}", method, uri.path()),
    )
}

/// Rewrite plain-text 408 and 413 responses from the middleware stack as
/// error envelopes.
async fn json_error_body(response: Response) -> Response {
    let message = match response.status() {
        StatusCode::REQUEST_TIMEOUT => "Request timed out",
        StatusCode::PAYLOAD_TOO_LARGE => "Request body too large",
        _ => return response,
    };
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if is_json {
        return response;
    }
    Reply::error(response.status(), message).into_response()
}
