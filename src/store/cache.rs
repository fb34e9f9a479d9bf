//! Last-known-good read cache.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;
use std::time::Duration;

use crate::observability::metrics;
use crate::store::{from_millis, to_millis, Store, StoreError};

/// A cached read response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub resource_key: String,
    pub payload: Value,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Time-bounded cache of upstream read responses, keyed by resource path.
///
/// Expired rows are not deleted; they stop being returned and are replaced by
/// the next `put` for the same key.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Store,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Default lifetime of a cached response.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

    pub fn new(store: Store) -> Self {
        Self {
            store,
            default_ttl: Self::DEFAULT_TTL,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `payload` under `key`, replacing any previous entry.
    pub async fn put(&self, key: &str, payload: &Value, ttl: Duration) -> Result<(), StoreError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let key = key.to_string();
        let payload = payload.to_string();
        let (cached_at, expires_at) = (to_millis(now), to_millis(expires_at));

        self.store
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO data_cache (resource_key, payload, cached_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, payload, cached_at, expires_at],
                )?;
                Ok(())
            })
            .await?;
        metrics::record_cache_event("store");
        Ok(())
    }

    /// Store with the configured default lifetime.
    pub async fn put_default(&self, key: &str, payload: &Value) -> Result<(), StoreError> {
        self.put(key, payload, self.default_ttl).await
    }

    /// Fetch the payload for `key` unless it is missing or expired.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entry = self.entry(key).await?;
        metrics::record_cache_event(if entry.is_some() { "hit" } else { "miss" });
        Ok(entry.map(|e| e.payload))
    }

    /// Fetch the full live entry for `key`.
    pub async fn entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let key = key.to_string();
        let now = to_millis(Utc::now());

        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT resource_key, payload, cached_at, expires_at FROM data_cache
                     WHERE resource_key = ?1 AND expires_at > ?2",
                )?;
                let mut rows = stmt.query(params![key, now])?;
                let row = match rows.next()? {
                    Some(row) => row,
                    None => return Ok(None),
                };

                let payload: String = row.get(1)?;
                let entry = CacheEntry {
                    resource_key: row.get(0)?,
                    payload: serde_json::from_str(&payload)
                        .map_err(|e| StoreError::Corrupt(format!("invalid cached payload: {}", e)))?,
                    cached_at: from_millis(row.get(2)?)?,
                    expires_at: from_millis(row.get(3)?)?,
                };
                Ok(Some(entry))
            })
            .await
    }
}
