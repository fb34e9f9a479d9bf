use axum::{extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::http::response::{Envelope, Reply};
use crate::http::server::AppState;
use crate::store::{QueueEntry, QueueStats, QueueStatus, StoreError};

#[derive(Serialize)]
pub struct ServerStatus {
    pub server_status: &'static str,
    pub upstream: &'static str,
    pub queue: QueueStats,
    pub last_check: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub method: String,
    pub endpoint: String,
    pub data: Option<serde_json::Value>,
    pub retry_count: u32,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
}

impl From<QueueEntry> for QueueItem {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: entry.id,
            method: entry.method.to_string(),
            endpoint: entry.path,
            data: entry.body,
            retry_count: entry.retry_count,
            status: entry.status,
            created_at: entry.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct QueueListing {
    pub count: usize,
    pub items: Vec<QueueItem>,
}

/// Proxy health, upstream verdict and queue counts.
pub async fn get_status(State(state): State<AppState>) -> Reply {
    let alive = state.liveness.is_upstream_alive().await;
    let queue = match state.queue.stats().await {
        Ok(stats) => stats,
        Err(e) => return store_failure("read queue stats", e),
    };

    let status = ServerStatus {
        server_status: "online",
        upstream: if alive { "online" } else { "offline" },
        queue,
        last_check: state.liveness.snapshot().checked_at,
        timestamp: Utc::now(),
    };
    success(json!(status))
}

/// Entries still due for replay, oldest first.
pub async fn get_queue(State(state): State<AppState>) -> Reply {
    match state.queue.list_pending().await {
        Ok(items) => success(json!(QueueListing {
            count: items.len(),
            items: items.into_iter().map(QueueItem::from).collect(),
        })),
        Err(e) => store_failure("list queue", e),
    }
}

/// Remove every queue entry regardless of status.
pub async fn clear_queue(State(state): State<AppState>) -> Reply {
    match state.queue.purge().await {
        Ok(removed) => {
            tracing::warn!(removed, "Request queue cleared");
            Reply::envelope(
                StatusCode::OK,
                Envelope::success(json!({ "removed": removed })).message("Queue cleared"),
            )
        }
        Err(e) => store_failure("clear queue", e),
    }
}

/// Drain the queue now, without waiting for the next cycle.
pub async fn trigger_sync(State(state): State<AppState>) -> Reply {
    match state.worker.drain().await {
        Ok(report) => Reply::envelope(
            StatusCode::OK,
            Envelope::success(json!(report)).message("Sync completed"),
        ),
        Err(e) => store_failure("sync queue", e),
    }
}

fn success(data: serde_json::Value) -> Reply {
    Reply::envelope(StatusCode::OK, Envelope::success(data))
}

fn store_failure(action: &str, error: StoreError) -> Reply {
    tracing::error!(error = %error, "Failed to {}", action);
    Reply::error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {}", action))
}
