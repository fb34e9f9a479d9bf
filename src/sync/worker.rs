//! Background queue drain and cache refresh.
//!
//! # Responsibilities
//! - Every `interval`, check liveness and replay queued writes in id order
//! - Refresh the read cache for the hot resources
//! - Expose a single cycle (`run_cycle`) so callers and tests can drive it
//!
//! # Design Decisions
//! - One pass over the pending set per cycle, no liveness recheck mid-drain
//! - Failed entries go back to pending until they reach the retry limit
//! - A drain already in progress makes concurrent drains return empty

use axum::http::Method;
use chrono::Local;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::health::LivenessMonitor;
use crate::observability::metrics;
use crate::proxy::{ForwardOutcome, Forwarder};
use crate::store::{DurableQueue, QueueEntry, ResponseCache, StoreError};

/// Placeholder in hot paths replaced by today's local date.
pub const TODAY_PLACEHOLDER: &str = "{today}";

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Result of one scheduled cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Upstream was not reachable; nothing was attempted.
    UpstreamDown,
    /// Queue drained and cache refreshed.
    Completed { report: SyncReport, refreshed: usize },
}

pub struct SyncWorker {
    liveness: Arc<LivenessMonitor>,
    forwarder: Forwarder,
    queue: DurableQueue,
    cache: ResponseCache,
    hot_paths: Vec<String>,
    interval: Duration,
    draining: AtomicBool,
}

impl SyncWorker {
    pub fn new(
        liveness: Arc<LivenessMonitor>,
        forwarder: Forwarder,
        queue: DurableQueue,
        cache: ResponseCache,
        hot_paths: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            liveness,
            forwarder,
            queue,
            cache,
            hot_paths,
            interval,
            draining: AtomicBool::new(false),
        }
    }

    /// Run cycles until the shutdown signal fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            hot_paths = self.hot_paths.len(),
            "Sync worker starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sync worker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One scheduled cycle: liveness gate, drain, cache refresh.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if !self.liveness.is_upstream_alive().await {
            return CycleOutcome::UpstreamDown;
        }

        let report = match self.drain().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Queue drain failed");
                SyncReport::default()
            }
        };
        let refreshed = self.refresh_cache().await;

        CycleOutcome::Completed { report, refreshed }
    }

    /// Replay every pending entry once, oldest first.
    ///
    /// Does not consult the liveness monitor; unreachable upstreams simply
    /// fail each entry.
    pub async fn drain(&self) -> Result<SyncReport, StoreError> {
        if self.draining.swap(true, Ordering::AcqRel) {
            tracing::debug!("Drain already in progress");
            return Ok(SyncReport::default());
        }
        let _guard = DrainGuard(&self.draining);

        let entries = self.queue.list_pending().await?;
        let mut report = SyncReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        tracing::info!(pending = entries.len(), "Starting sync of queued writes");

        for entry in entries {
            if entry.method == Method::GET {
                self.queue.mark_synced(entry.id).await?;
                report.skipped += 1;
                continue;
            }

            if self.replay(&entry).await {
                self.queue.mark_synced(entry.id).await?;
                report.synced += 1;
            } else {
                self.queue.mark_failed(entry.id).await?;
                report.failed += 1;
            }
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            "Sync completed"
        );
        metrics::record_sync(report.synced, report.failed, report.skipped);
        if let Ok(stats) = self.queue.stats().await {
            metrics::record_queue_depth(stats.pending);
        }

        Ok(report)
    }

    async fn replay(&self, entry: &QueueEntry) -> bool {
        match self
            .forwarder
            .forward(entry.method.clone(), &entry.path, entry.body.as_ref())
            .await
        {
            Ok(ForwardOutcome::Success { .. }) => {
                tracing::info!(id = entry.id, method = %entry.method, path = %entry.path, "Synced queued write");
                true
            }
            Ok(outcome) => {
                tracing::warn!(
                    id = entry.id,
                    method = %entry.method,
                    path = %entry.path,
                    outcome = outcome.label(),
                    retries = entry.retry_count + 1,
                    "Failed to sync queued write"
                );
                false
            }
            Err(e) => {
                tracing::error!(id = entry.id, error = %e, "Queued write cannot be sent");
                false
            }
        }
    }

    /// Re-read each hot path into the cache. Returns how many were stored.
    pub async fn refresh_cache(&self) -> usize {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let mut refreshed = 0;

        for template in &self.hot_paths {
            let path = expand_hot_path(template, &today);
            match self.forwarder.forward(Method::GET, &path, None).await {
                Ok(ForwardOutcome::Success { body, .. }) => {
                    let payload = body.unwrap_or(serde_json::Value::Null);
                    match self.cache.put_default(&path, &payload).await {
                        Ok(()) => {
                            tracing::debug!(path = %path, "Refreshed cache");
                            refreshed += 1;
                        }
                        Err(e) => tracing::warn!(path = %path, error = %e, "Failed to refresh cache"),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %path, error = %e, "Invalid hot path"),
            }
        }

        refreshed
    }
}

/// Resets the drain flag when a drain ends, including on early return.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Substitute the `{today}` placeholder.
pub fn expand_hot_path(template: &str, today: &str) -> String {
    template.replace(TODAY_PLACEHOLDER, today)
}
