//! Durable write queue.
//!
//! Writes that could not reach the upstream are appended here and replayed
//! later by the sync worker. Replay order is `id` order; ids come from
//! SQLite's `AUTOINCREMENT` and are never reused.

use axum::http::Method;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::observability::metrics;
use crate::store::{from_millis, to_millis, Store, StoreError};

/// Methods that may be queued. Reads are never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    Post,
    Put,
    Delete,
}

impl WriteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMethod::Post => "POST",
            WriteMethod::Put => "PUT",
            WriteMethod::Delete => "DELETE",
        }
    }
}

impl TryFrom<&Method> for WriteMethod {
    type Error = ();

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        if method == Method::POST {
            Ok(WriteMethod::Post)
        } else if method == Method::PUT {
            Ok(WriteMethod::Put)
        } else if method == Method::DELETE {
            Ok(WriteMethod::Delete)
        } else {
            Err(())
        }
    }
}

impl From<WriteMethod> for Method {
    fn from(method: WriteMethod) -> Self {
        match method {
            WriteMethod::Post => Method::POST,
            WriteMethod::Put => Method::PUT,
            WriteMethod::Delete => Method::DELETE,
        }
    }
}

/// Replay status of a queued write.
///
/// A failed replay puts the entry back to `Pending` with a higher retry
/// count. `Failed` is terminal: the entry reached the retry limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Synced,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Synced => "synced",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "synced" => Ok(QueueStatus::Synced),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown queue status '{}'", other))),
        }
    }
}

/// A queued write as stored.
///
/// `method` is kept as a general HTTP method because rows written by other
/// tools may hold anything; the sync worker skips stray reads.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: QueueStatus,
}

fn serialize_method<S: serde::Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(method.as_str())
}

impl QueueEntry {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        let method: String = row.get("method")?;
        let body: Option<String> = row.get("body")?;
        let status: String = row.get("status")?;
        let created_at: i64 = row.get("created_at")?;

        let method = Method::from_str(&method)
            .map_err(|_| StoreError::Corrupt(format!("invalid method '{}'", method)))?;
        let body = body
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("invalid body: {}", e)))?;

        Ok(Self {
            id: row.get("id")?,
            method,
            path: row.get("path")?,
            body,
            created_at: from_millis(created_at)?,
            retry_count: row.get("retry_count")?,
            status: status.parse()?,
        })
    }
}

/// Entry counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub synced: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.synced + self.failed
    }
}

const SELECT_COLUMNS: &str = "id, method, path, body, created_at, retry_count, status";

/// Persistent, ordered log of writes awaiting replay.
#[derive(Debug, Clone)]
pub struct DurableQueue {
    store: Store,
    max_retries: Option<u32>,
}

impl DurableQueue {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            max_retries: None,
        }
    }

    /// Stop replaying entries that have failed `limit` times.
    pub fn with_retry_limit(mut self, limit: Option<u32>) -> Self {
        self.max_retries = limit;
        self
    }

    /// Append a write. Returns its replay id.
    pub async fn enqueue(
        &self,
        method: WriteMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<i64, StoreError> {
        let path = path.to_string();
        let body = body.map(Value::to_string);
        let created_at = to_millis(Utc::now());

        let id = self
            .store
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO request_queue (method, path, body, created_at, retry_count, status)
                     VALUES (?1, ?2, ?3, ?4, 0, 'pending')",
                    params![method.as_str(), path, body, created_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        tracing::info!(id, method = method.as_str(), "Write queued");
        metrics::record_queue_event("enqueued");
        Ok(id)
    }

    /// Entries still awaiting replay, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM request_queue
                     WHERE status = 'pending'
                     ORDER BY id ASC"
                ))?;
                let mut rows = stmt.query([])?;
                let mut entries = Vec::new();
                while let Some(row) = rows.next()? {
                    entries.push(QueueEntry::from_row(row)?);
                }
                Ok(entries)
            })
            .await
    }

    /// Look up a single entry regardless of status.
    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM request_queue WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(params![id])?;
                let entry = match rows.next()? {
                    Some(row) => Some(QueueEntry::from_row(row)?),
                    None => None,
                };
                Ok(entry)
            })
            .await
    }

    /// Record a successful replay.
    pub async fn mark_synced(&self, id: i64) -> Result<(), StoreError> {
        self.store
            .call(move |conn| {
                conn.execute(
                    "UPDATE request_queue SET status = 'synced' WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        metrics::record_queue_event("synced");
        Ok(())
    }

    /// Record a failed replay. Returns the new retry count.
    ///
    /// The entry goes back to `pending` unless it just reached the retry
    /// limit, in which case it is parked as `failed`.
    pub async fn mark_failed(&self, id: i64) -> Result<Option<u32>, StoreError> {
        let limit = self.max_retries.map(i64::from);
        let retries = self
            .store
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE request_queue
                     SET retry_count = retry_count + 1,
                         status = CASE
                             WHEN ?2 IS NOT NULL AND retry_count + 1 >= ?2 THEN 'failed'
                             ELSE 'pending'
                         END
                     WHERE id = ?1 AND status = 'pending'",
                    params![id, limit],
                )?;
                let retries: Option<u32> = tx
                    .query_row(
                        "SELECT retry_count FROM request_queue WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.commit()?;
                Ok(retries)
            })
            .await?;

        if let (Some(count), Some(limit)) = (retries, self.max_retries) {
            if count >= limit {
                tracing::warn!(id, retries = count, "Queued write exhausted its retries");
            }
        }
        metrics::record_queue_event("failed");
        Ok(retries)
    }

    /// Entry counts by status.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.store
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM request_queue GROUP BY status")?;
                let mut rows = stmt.query([])?;
                let mut stats = QueueStats::default();
                while let Some(row) = rows.next()? {
                    let status: String = row.get(0)?;
                    let count = row.get::<_, i64>(1)? as u64;
                    match status.parse()? {
                        QueueStatus::Pending => stats.pending = count,
                        QueueStatus::Synced => stats.synced = count,
                        QueueStatus::Failed => stats.failed = count,
                    }
                }
                Ok(stats)
            })
            .await
    }

    /// Delete every entry. Returns how many were removed.
    pub async fn purge(&self) -> Result<usize, StoreError> {
        let removed = self
            .store
            .call(|conn| Ok(conn.execute("DELETE FROM request_queue", [])?))
            .await?;
        tracing::warn!(removed, "Request queue purged");
        Ok(removed)
    }
}
