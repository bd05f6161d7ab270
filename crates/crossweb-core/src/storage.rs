//! Durable storage for encrypted blobs and configuration
//!
//! Handles reading/writing the blob document with:
//! - Atomic writes (write to temp, then rename)
//! - Owner-only permissions on Unix
//! - Schema version checking
//!
//! Only already-encrypted blobs are stored here; nothing in this module ever
//! sees plaintext.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::models::CrosswebConfig;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "CROSSWEB_DIR";

/// Fallback directory name when no platform data dir exists
const FALLBACK_DIR: &str = ".crossweb";

/// Blob document file name
const BLOB_FILE: &str = "keystore.json";

/// Config file name
const CONFIG_FILE: &str = "config.toml";

/// Current blob document schema
const SCHEMA_VERSION: u8 = 1;

/// Get the default data directory path
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("crossweb"))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DIR))
}

/// Get the blob document path
pub fn blob_file_path(base_dir: &Path) -> PathBuf {
    base_dir.join(BLOB_FILE)
}

/// Get the config file path
pub fn config_file_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_FILE)
}

/// Get the software key directory
pub fn key_dir_path(base_dir: &Path) -> PathBuf {
    base_dir.join("keys")
}

/// Ensure a directory exists with owner-only permissions
pub async fn ensure_private_dir(dir: &Path) -> VaultResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).await?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

/// Blocking variant of [`ensure_private_dir`] for synchronous key stores
pub fn ensure_private_dir_sync(dir: &Path) -> VaultResult<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

fn set_dir_permissions(dir: &Path) -> VaultResult<()> {
    // Set directory permissions to 700 (owner only) on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms)?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Durable key-value storage of base64 blobs, one entry per alias
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, alias: &str, blob: &str) -> VaultResult<()>;

    /// `Ok(None)` when nothing has been saved for `alias`
    async fn load(&self, alias: &str) -> VaultResult<Option<String>>;

    async fn remove(&self, alias: &str) -> VaultResult<bool>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BlobDocument {
    schema_version: u8,
    entries: BTreeMap<String, BlobEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobEntry {
    blob: String,
    updated_at: DateTime<Utc>,
}

/// JSON document on disk holding every alias' blob
#[derive(Debug)]
pub struct FileBlobStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileBlobStore {
    pub fn new(base_dir: &Path) -> Self {
        Self::at_path(blob_file_path(base_dir))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> VaultResult<Option<BlobDocument>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultError::Storage(format!("read {}: {}", self.path.display(), e))),
        };

        let doc: BlobDocument = serde_json::from_slice(&data)
            .map_err(|e| VaultError::Storage(format!("corrupted blob document: {}", e)))?;

        // Check version
        if doc.schema_version > SCHEMA_VERSION {
            return Err(VaultError::Storage(format!(
                "blob document version {} is newer than supported version {}",
                doc.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(Some(doc))
    }

    async fn write_document(&self, doc: &BlobDocument) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_private_dir(parent).await?;
            }
        }

        let data = serde_json::to_vec_pretty(doc)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&temp_path)
            .await
            .map_err(|e| VaultError::Storage(format!("open {}: {}", temp_path.display(), e)))?;
        file.write_all(&data)
            .await
            .map_err(|e| VaultError::Storage(format!("write {}: {}", temp_path.display(), e)))?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| VaultError::Storage(format!("rename {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn save(&self, alias: &str, blob: &str) -> VaultResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?.unwrap_or_default();
        doc.schema_version = SCHEMA_VERSION;
        doc.entries.insert(
            alias.to_string(),
            BlobEntry {
                blob: blob.to_string(),
                updated_at: Utc::now(),
            },
        );
        self.write_document(&doc).await?;
        debug!(alias, "saved encrypted blob");
        Ok(())
    }

    async fn load(&self, alias: &str) -> VaultResult<Option<String>> {
        let Some(doc) = self.read_document().await? else {
            return Ok(None);
        };
        Ok(doc.entries.get(alias).map(|entry| entry.blob.clone()))
    }

    async fn remove(&self, alias: &str) -> VaultResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut doc) = self.read_document().await? else {
            return Ok(false);
        };
        let removed = doc.entries.remove(alias).is_some();
        if removed {
            self.write_document(&doc).await?;
        }
        Ok(removed)
    }
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, alias: &str, blob: &str) -> VaultResult<()> {
        self.entries
            .lock()
            .await
            .insert(alias.to_string(), blob.to_string());
        Ok(())
    }

    async fn load(&self, alias: &str) -> VaultResult<Option<String>> {
        Ok(self.entries.lock().await.get(alias).cloned())
    }

    async fn remove(&self, alias: &str) -> VaultResult<bool> {
        Ok(self.entries.lock().await.remove(alias).is_some())
    }
}

/// Load configuration, falling back to defaults when the file is absent
pub async fn load_config(base_dir: &Path) -> VaultResult<CrosswebConfig> {
    let config_path = config_file_path(base_dir);

    if !config_path.exists() {
        return Ok(CrosswebConfig::default());
    }

    let content = fs::read_to_string(&config_path).await?;
    let config: CrosswebConfig =
        toml::from_str(&content).map_err(|e| VaultError::ConfigError(e.to_string()))?;

    Ok(config)
}

/// Save configuration
pub async fn save_config(base_dir: &Path, config: &CrosswebConfig) -> VaultResult<()> {
    ensure_private_dir(base_dir).await?;

    let config_path = config_file_path(base_dir);
    let content =
        toml::to_string_pretty(config).map_err(|e| VaultError::ConfigError(e.to_string()))?;

    fs::write(&config_path, content).await?;

    Ok(())
}
