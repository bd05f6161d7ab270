//! Native embedding for webview shells
//!
//! Provides a synchronous host facade over the crossweb bridge and the
//! script shim the shell injects into every page.

pub mod api;
pub mod script;

pub use api::*;
pub use script::*;
