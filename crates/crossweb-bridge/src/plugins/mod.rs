//! Built-in plugins

pub mod fs;
pub mod keystore;

pub use fs::FsPlugin;
pub use keystore::KeystorePlugin;

use serde_json::Value;

/// Read a payload that is either raw text or a JSON string literal
pub(crate) fn text_payload(payload: &str) -> String {
    let trimmed = payload.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(inner)) => inner.trim().to_string(),
        _ => trimmed.to_string(),
    }
}
