//! Request relay subsystem.
//!
//! # Data Flow
//! ```text
//! client request
//!     → dispatcher.rs
//!         → upstream alive?  → forwarder.rs → success: answer (+ cache reads)
//!                                           → rejected: answer verbatim
//!                                           → unreachable: fall back
//!         → fallback: writes → durable queue (202)
//!                     reads  → response cache (200 cached / 503)
//! ```

pub mod dispatcher;
pub mod forwarder;

pub use dispatcher::{Dispatched, Dispatcher, Disposition};
pub use forwarder::{ForwardError, ForwardOutcome, Forwarder, TransportFailure};
