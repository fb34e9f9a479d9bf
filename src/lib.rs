//! Buffering proxy between clients and an upstream configuration service.
//!
//! Writes made while the upstream is unreachable are queued on disk and
//! replayed in order once it comes back; reads fall back to a local cache.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod store;
pub mod sync;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Relay, Shutdown};
