//! Crossweb Bridge - correlated request/response channel to native commands
//!
//! This crate provides:
//! - JSON wire frames (NDJSON on streams, escaped script calls for webviews)
//! - A correlation table with per-invocation deadlines
//! - The script-side `BridgeClient`
//! - The native-side `Dispatcher` with exactly-once completion per id
//! - Namespaced plugins, including `keystore` and `fs`
//! - Host wiring and a stdio NDJSON host

pub mod wire;
pub mod correlation;
pub mod client;
pub mod dispatcher;
pub mod registry;
pub mod plugins;
pub mod state;
pub mod stdio;

pub use wire::*;
pub use correlation::*;
pub use client::*;
pub use dispatcher::*;
pub use registry::*;
pub use state::*;
