//! Data models shared by the bridge and the vault

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// A named command with its raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Dotted identifier, e.g. `keystore.encrypt`
    pub name: String,
    /// Handler-defined payload (plain string or JSON text)
    pub payload: String,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Split `plugin.command` on the first dot
    pub fn split_name(&self) -> Option<(&str, &str)> {
        let (plugin, command) = self.name.split_once('.')?;
        if plugin.is_empty() || command.is_empty() {
            return None;
        }
        Some((plugin, command))
    }
}

/// Fire-and-forget notification from native to script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub data: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Symmetric algorithm of a vault key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
}

/// Generation parameters of the single logical key behind an alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultKeySpec {
    pub alias: String,
    pub algorithm: KeyAlgorithm,
    /// Whether each use must be preceded by a user-presence check
    pub auth_required: bool,
    /// Window after a passing check during which no new prompt is shown
    pub auth_validity_seconds: u64,
}

impl VaultKeySpec {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            algorithm: KeyAlgorithm::Aes256Gcm,
            auth_required: true,
            auth_validity_seconds: 30,
        }
    }

    pub fn auth_validity(&self) -> Duration {
        Duration::from_secs(self.auth_validity_seconds)
    }
}

/// Outcome of one user-presence prompt. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub success: bool,
    pub reason: String,
    /// False when no biometric or device credential is enrolled
    #[serde(default = "default_true")]
    pub method_available: bool,
}

fn default_true() -> bool {
    true
}

impl AuthenticationResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            reason: "Authentication succeeded".to_string(),
            method_available: true,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            method_available: true,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            method_available: false,
        }
    }
}

/// Text shown by the platform prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub title: String,
    pub subtitle: String,
}

impl Default for PromptInfo {
    fn default() -> Self {
        Self {
            title: "Authenticate".to_string(),
            subtitle: "Authenticate to access keystore".to_string(),
        }
    }
}

/// Top-level configuration, persisted as `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrosswebConfig {
    pub bridge: BridgeConfig,
    pub vault: VaultConfig,
    pub auth: AuthConfig,
    pub fs: FsConfig,
}

/// Bridge protocol limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Per-invocation deadline
    pub invoke_timeout_ms: u64,
    pub max_id_len: usize,
    pub max_command_len: usize,
    pub max_payload_bytes: usize,
    /// Bound of the native -> script delivery queue
    pub outbound_queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            invoke_timeout_ms: 30_000,
            max_id_len: 64,
            max_command_len: 256,
            max_payload_bytes: 64 * 1024,
            outbound_queue_capacity: 64,
        }
    }
}

impl BridgeConfig {
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}

/// Vault key parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub alias: String,
    pub auth_required: bool,
    pub auth_validity_seconds: u64,
    pub prompt_title: String,
    pub prompt_subtitle: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let prompt = PromptInfo::default();
        Self {
            alias: "crossweb.keystore".to_string(),
            auth_required: true,
            auth_validity_seconds: 30,
            prompt_title: prompt.title,
            prompt_subtitle: prompt.subtitle,
        }
    }
}

impl VaultConfig {
    pub fn key_spec(&self) -> VaultKeySpec {
        VaultKeySpec {
            alias: self.alias.clone(),
            algorithm: KeyAlgorithm::Aes256Gcm,
            auth_required: self.auth_required,
            auth_validity_seconds: self.auth_validity_seconds,
        }
    }

    pub fn prompt(&self) -> PromptInfo {
        PromptInfo {
            title: self.prompt_title.clone(),
            subtitle: self.prompt_subtitle.clone(),
        }
    }
}

/// Which authenticator backs the vault
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Biometric / device credential provided by the OS
    #[default]
    Platform,
    /// Always passes. Only for non-secure test environments.
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub method: AuthMethod,
}

/// Filesystem plugin settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub enabled: bool,
    /// Sandbox root; defaults to `<data_dir>/files` when unset
    pub root: Option<PathBuf>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command_name() {
        let cmd = Command::new("keystore.encrypt", "deadbeef");
        assert_eq!(cmd.split_name(), Some(("keystore", "encrypt")));

        // Only the first dot separates the plugin
        let nested = Command::new("fs.read.all", "");
        assert_eq!(nested.split_name(), Some(("fs", "read.all")));

        assert_eq!(Command::new("keystore", "").split_name(), None);
        assert_eq!(Command::new(".encrypt", "").split_name(), None);
        assert_eq!(Command::new("keystore.", "").split_name(), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = CrosswebConfig::default();
        assert_eq!(config.bridge.invoke_timeout(), Duration::from_secs(30));
        assert_eq!(config.bridge.outbound_queue_capacity, 64);
        assert_eq!(config.vault.key_spec().auth_validity(), Duration::from_secs(30));
        assert!(config.vault.auth_required);
        assert_eq!(config.auth.method, AuthMethod::Platform);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: CrosswebConfig = toml::from_str(
            r#"
            [auth]
            method = "none"

            [bridge]
            invoke_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.method, AuthMethod::None);
        assert_eq!(config.bridge.invoke_timeout_ms, 500);
        assert_eq!(config.bridge.max_id_len, 64);
        assert_eq!(config.vault.alias, "crossweb.keystore");
    }

    #[test]
    fn test_authentication_result_constructors() {
        assert!(AuthenticationResult::passed().success);
        let failed = AuthenticationResult::failed("cancelled");
        assert!(!failed.success && failed.method_available);
        let unavailable = AuthenticationResult::unavailable("no biometrics");
        assert!(!unavailable.success && !unavailable.method_available);
    }
}
