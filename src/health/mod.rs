//! Upstream health subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher / SyncWorker
//!     → liveness.rs (is the upstream reachable?)
//!     → cached verdict fresh?  yes → answer
//!                              no  → probe <base>/status, update state.rs
//! ```
//!
//! # Design Decisions
//! - One shared verdict per process, guarded by an async mutex
//! - The probe is the only network call and it is bounded by a timeout
//! - No retries inside a probe; the sync interval is the retry loop

pub mod liveness;
pub mod state;

pub use liveness::{LivenessMonitor, LivenessSnapshot};
pub use state::{Clock, LivenessState, ManualClock, StatusChange, SystemClock};
