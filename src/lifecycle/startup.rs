//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the local store
//! - Build the forwarder, liveness monitor, queue, cache, dispatcher and
//!   sync worker from one validated config
//!
//! # Design Decisions
//! - Fail fast: a store that cannot be opened is fatal
//! - Every component shares the same forwarder and store handle

use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::health::{Clock, LivenessMonitor, SystemClock};
use crate::proxy::{Dispatcher, Forwarder};
use crate::store::{DurableQueue, ResponseCache, Store, StoreError};
use crate::sync::SyncWorker;

/// Fatal startup failures.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open local store: {0}")]
    Store(#[from] StoreError),
}

/// Every long-lived component of the proxy, wired together.
#[derive(Clone)]
pub struct Relay {
    pub forwarder: Forwarder,
    pub liveness: Arc<LivenessMonitor>,
    pub queue: DurableQueue,
    pub cache: ResponseCache,
    pub dispatcher: Arc<Dispatcher>,
    pub worker: Arc<SyncWorker>,
}

impl Relay {
    pub fn build(config: &ProxyConfig) -> Result<Self, StartupError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build with an injected clock for the liveness cache.
    pub fn with_clock(config: &ProxyConfig, clock: Arc<dyn Clock>) -> Result<Self, StartupError> {
        let store = Store::open(
            &config.store.path,
            Duration::from_millis(config.store.busy_timeout_ms),
        )?;

        let forwarder = Forwarder::new(&config.upstream.base_url, config.upstream.request_timeout());
        let liveness = Arc::new(LivenessMonitor::with_clock(
            forwarder.clone(),
            config.upstream.health_path.clone(),
            config.liveness.cache_ttl(),
            config.liveness.probe_timeout(),
            clock,
        ));
        let queue = DurableQueue::new(store.clone()).with_retry_limit(config.sync.max_retries);
        let cache = ResponseCache::new(store).with_default_ttl(config.cache.ttl());

        let dispatcher = Arc::new(Dispatcher::new(
            liveness.clone(),
            forwarder.clone(),
            queue.clone(),
            cache.clone(),
        ));
        let worker = Arc::new(SyncWorker::new(
            liveness.clone(),
            forwarder.clone(),
            queue.clone(),
            cache.clone(),
            config.sync.hot_paths.clone(),
            Duration::from_secs(config.sync.interval_secs),
        ));

        Ok(Self {
            forwarder,
            liveness,
            queue,
            cache,
            dispatcher,
            worker,
        })
    }
}
