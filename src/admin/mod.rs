//! Proxy management endpoints, mounted under the API prefix.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use crate::http::server::AppState;
use self::handlers::*;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/server/status", get(get_status))
        .route("/server/queue", get(get_queue))
        .route("/server/queue/clear", post(clear_queue))
        .route("/server/sync", post(trigger_sync))
}
