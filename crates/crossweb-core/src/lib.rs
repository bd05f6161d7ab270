//! Crossweb Core - command model and secure vault
//!
//! This crate provides:
//! - Command, event and configuration types shared by every host
//! - AES-256-GCM sealing with a fresh IV per operation
//! - Non-exportable key stores (Keychain on macOS, owner-only files elsewhere)
//! - A user-presence gate with an authentication validity window
//! - Atomic on-disk persistence of the encrypted blob

pub mod models;
pub mod crypto;
pub mod keystore;
pub mod storage;
pub mod auth;
pub mod vault;
pub mod platform;
pub mod error;

pub use models::*;
pub use crypto::*;
pub use keystore::*;
pub use storage::*;
pub use auth::*;
pub use vault::*;
pub use error::*;
