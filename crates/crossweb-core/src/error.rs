//! Error types for bridge and vault operations
//!
//! Every error maps onto an [`ErrorKind`], which is what crosses the bridge.
//! Messages never carry plaintext or key material.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, serialisable classification of every failure the bridge surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No native side reachable
    BridgeUnavailable,
    /// No resolution within the invocation deadline
    InvokeTimeout,
    /// No handler registered for the command name
    UnknownCommand,
    /// No enrolled user-presence method
    AuthenticationUnavailable,
    /// Prompt shown, user failed or cancelled
    AuthenticationFailed,
    /// Tag mismatch or malformed blob
    CryptoIntegrity,
    /// Persistence read/write failure
    Storage,
    /// Request rejected before reaching a handler
    InvalidPayload,
    /// Handler faulted without producing a result
    HandlerFault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BridgeUnavailable => "bridge_unavailable",
            ErrorKind::InvokeTimeout => "invoke_timeout",
            ErrorKind::UnknownCommand => "unknown_command",
            ErrorKind::AuthenticationUnavailable => "authentication_unavailable",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::CryptoIntegrity => "crypto_integrity",
            ErrorKind::Storage => "storage",
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::HandlerFault => "handler_fault",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the vault, its key store and its durable storage
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("No user-presence method available: {0}")]
    AuthenticationUnavailable(String),

    #[error("User-presence check failed: {0}")]
    AuthenticationFailed(String),

    #[error("Ciphertext failed integrity check")]
    CryptoIntegrity,

    #[error("Malformed encrypted blob: {0}")]
    MalformedBlob(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl VaultError {
    /// Wire classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::AuthenticationUnavailable(_) => ErrorKind::AuthenticationUnavailable,
            VaultError::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            VaultError::CryptoIntegrity | VaultError::MalformedBlob(_) => ErrorKind::CryptoIntegrity,
            VaultError::EncryptionError(_) | VaultError::KeyStore(_) => ErrorKind::HandlerFault,
            VaultError::Storage(_)
            | VaultError::IoError(_)
            | VaultError::SerializationError(_)
            | VaultError::ConfigError(_) => ErrorKind::Storage,
        }
    }
}

/// Failure delivered by a command handler through the bridge
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_command(name: &str) -> Self {
        Self::new(ErrorKind::UnknownCommand, format!("unknown command: {}", name))
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPayload, message)
    }

    pub fn handler_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerFault, message)
    }
}

impl From<VaultError> for CommandError {
    fn from(err: VaultError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Errors surfaced to the script side of the bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Native bridge not available: {0}")]
    BridgeUnavailable(String),

    #[error("Native call timed out after {0} ms")]
    InvokeTimeout(u64),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Command rejected: {0}")]
    Rejected(CommandError),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::BridgeUnavailable(_) => ErrorKind::BridgeUnavailable,
            BridgeError::InvokeTimeout(_) => ErrorKind::InvokeTimeout,
            BridgeError::InvalidFrame(_) => ErrorKind::InvalidPayload,
            BridgeError::Rejected(err) => err.kind,
        }
    }
}

impl From<CommandError> for BridgeError {
    fn from(err: CommandError) -> Self {
        BridgeError::Rejected(err)
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
pub type CommandResult<T> = Result<T, CommandError>;
pub type BridgeResult<T> = Result<T, BridgeError>;
