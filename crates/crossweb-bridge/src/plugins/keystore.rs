//! `keystore.*` commands backed by the secure vault
//!
//! - `encrypt(hex)` -> `{ok, encrypted}`
//! - `decrypt(blob)` -> `{ok, privateKey}`
//! - `save(blob)` -> `{ok}`
//! - `load()` / `get()` -> `{ok, encrypted}` or `{ok:false, msg}`

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crossweb_core::{CommandError, CommandResult, EncryptedBlob, SecureVault};

use super::text_payload;
use crate::dispatcher::CompletionSink;
use crate::registry::{Plugin, PluginContext, Request};

const COMMANDS: &[&str] = &["encrypt", "decrypt", "save", "load", "get"];

pub struct KeystorePlugin {
    vault: Arc<SecureVault>,
}

impl KeystorePlugin {
    pub fn new(vault: Arc<SecureVault>) -> Self {
        Self { vault }
    }

    /// Run one keystore command to completion
    pub async fn handle(&self, command: &str, payload: &str) -> CommandResult<Value> {
        match command {
            "encrypt" => self.encrypt(payload).await,
            "decrypt" => self.decrypt(payload).await,
            "save" => self.save(payload).await,
            "load" | "get" => self.load().await,
            other => Err(CommandError::unknown_command(&format!("keystore.{}", other))),
        }
    }

    async fn encrypt(&self, payload: &str) -> CommandResult<Value> {
        let plaintext = hex::decode(text_payload(payload))
            .map_err(|e| CommandError::invalid_payload(format!("expected hex string: {}", e)))?;
        let blob = self.vault.encrypt(&plaintext).await?;
        Ok(json!({ "ok": true, "encrypted": blob.to_base64() }))
    }

    async fn decrypt(&self, payload: &str) -> CommandResult<Value> {
        let blob = EncryptedBlob::from_base64(&text_payload(payload))?;
        let plaintext = self.vault.decrypt(&blob).await?;
        Ok(json!({ "ok": true, "privateKey": hex::encode(plaintext) }))
    }

    async fn save(&self, payload: &str) -> CommandResult<Value> {
        self.vault.save(&text_payload(payload)).await?;
        Ok(json!({ "ok": true }))
    }

    async fn load(&self) -> CommandResult<Value> {
        Ok(match self.vault.load().await? {
            Some(encrypted) => json!({ "ok": true, "encrypted": encrypted }),
            None => json!({ "ok": false, "msg": "no saved value" }),
        })
    }
}

#[async_trait]
impl Plugin for KeystorePlugin {
    fn name(&self) -> &str {
        "keystore"
    }

    fn commands(&self) -> &[&'static str] {
        COMMANDS
    }

    async fn init(&self, _ctx: &PluginContext) -> CommandResult<()> {
        info!(alias = %self.vault.alias(), "keystore plugin ready");
        Ok(())
    }

    async fn invoke(&self, request: Request, sink: CompletionSink) {
        debug!(id = %request.id, cmd = %request.command, "keystore request");
        let outcome = self.handle(&request.command, &request.payload).await;
        sink.complete(outcome).await;
    }
}
