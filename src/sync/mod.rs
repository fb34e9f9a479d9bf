//! Store-and-forward reconciliation.
//!
//! # Data Flow
//! ```text
//! interval tick
//!     → liveness check (skip cycle when upstream is down)
//!     → drain: pending entries in id order → forwarder
//!         success → mark synced
//!         otherwise → mark failed (retry next cycle)
//!     → refresh cache for hot paths
//! ```

pub mod worker;

pub use worker::{expand_hot_path, CycleOutcome, SyncReport, SyncWorker};
