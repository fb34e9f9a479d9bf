//! Upstream liveness state machine.
//!
//! # States
//! - Unknown: never probed
//! - Alive / Dead: last probe verdict, reused until it is `cache_ttl` old
//!
//! # Transitions
//! ```text
//! verdict != last reported  → emit StatusChange, remember it
//! verdict == last reported  → silent
//! ```
//!
//! # Design Decisions
//! - Pure state: no I/O, time is passed in
//! - Edge-triggered reporting so a flapping upstream produces one event
//!   per flip instead of one per probe

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of monotonic time for the liveness cache.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + *offset
    }
}

/// A flip of the reported verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    BecameAlive,
    BecameDead,
}

/// Cached liveness verdict.
#[derive(Debug, Clone)]
pub struct LivenessState {
    last_check: Option<Instant>,
    is_alive: bool,
    cache_ttl: Duration,
    last_reported: Option<bool>,
}

impl LivenessState {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            last_check: None,
            is_alive: false,
            cache_ttl,
            last_reported: None,
        }
    }

    /// The cached verdict, if it is still younger than the TTL.
    pub fn fresh_verdict(&self, now: Instant) -> Option<bool> {
        let last = self.last_check?;
        if now.saturating_duration_since(last) < self.cache_ttl {
            Some(self.is_alive)
        } else {
            None
        }
    }

    /// Store a new probe result. Returns the edge, if the verdict flipped.
    pub fn record(&mut self, now: Instant, alive: bool) -> Option<StatusChange> {
        self.last_check = Some(now);
        self.is_alive = alive;

        if self.last_reported == Some(alive) {
            return None;
        }
        self.last_reported = Some(alive);
        Some(if alive {
            StatusChange::BecameAlive
        } else {
            StatusChange::BecameDead
        })
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    pub fn last_check(&self) -> Option<Instant> {
        self.last_check
    }
}
