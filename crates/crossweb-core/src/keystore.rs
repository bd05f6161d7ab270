//! Secure key store capability
//!
//! A key store owns key material and only ever hands out opaque
//! [`KeyHandle`]s. Callers run operations against a handle; the raw key never
//! leaves the store.
//!
//! - [`FileKeyStore`]: software fallback, owner-only key files
//! - [`MemoryKeyStore`]: process-local keys for tests and ephemeral hosts
//! - platform stores (Keychain on macOS) live in [`crate::platform`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::crypto::{KeyMaterial, IV_SIZE, KEY_SIZE};
use crate::error::{VaultError, VaultResult};
use crate::models::VaultKeySpec;

/// Opaque reference to a key held by a [`SecureKeyStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    alias: String,
    spec: VaultKeySpec,
}

impl KeyHandle {
    pub fn new(spec: &VaultKeySpec) -> Self {
        Self {
            alias: spec.alias.clone(),
            spec: spec.clone(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn spec(&self) -> &VaultKeySpec {
        &self.spec
    }
}

/// Operation executed inside the key store
#[derive(Debug, Clone, Copy)]
pub enum KeyOperation<'a> {
    Seal {
        iv: &'a [u8; IV_SIZE],
        plaintext: &'a [u8],
    },
    Open {
        iv: &'a [u8; IV_SIZE],
        ciphertext: &'a [u8],
    },
}

impl KeyOperation<'_> {
    /// Run the operation with the given key
    pub fn apply(self, key: &KeyMaterial) -> VaultResult<Vec<u8>> {
        match self {
            KeyOperation::Seal { iv, plaintext } => key.seal(iv, plaintext),
            KeyOperation::Open { iv, ciphertext } => key.open(iv, ciphertext),
        }
    }
}

/// OS or hardware backed key storage
pub trait SecureKeyStore: Send + Sync {
    /// Return the key for `spec.alias`, generating it on first use
    fn get_or_create(&self, spec: &VaultKeySpec) -> VaultResult<KeyHandle>;

    /// Whether a key already exists for `alias`
    fn contains(&self, alias: &str) -> VaultResult<bool>;

    /// Run `op` with the key behind `handle`. Never provisions a missing key.
    fn use_key(&self, handle: &KeyHandle, op: KeyOperation<'_>) -> VaultResult<Vec<u8>>;

    /// Short description for status output
    fn backend(&self) -> &'static str;
}

/// Reject aliases that could escape a directory or a keychain namespace
pub fn validate_alias(alias: &str) -> VaultResult<()> {
    let valid = !alias.is_empty()
        && alias.len() <= 128
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !alias.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(VaultError::KeyStore(format!("invalid key alias: {:?}", alias)))
    }
}

/// Keys kept in process memory only
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, Arc<KeyMaterial>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, alias: &str) -> VaultResult<Arc<KeyMaterial>> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| VaultError::KeyStore("key table poisoned".to_string()))?;
        keys.get(alias)
            .cloned()
            .ok_or_else(|| VaultError::KeyStore(format!("no key for alias {}", alias)))
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get_or_create(&self, spec: &VaultKeySpec) -> VaultResult<KeyHandle> {
        validate_alias(&spec.alias)?;
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| VaultError::KeyStore("key table poisoned".to_string()))?;
        keys.entry(spec.alias.clone()).or_insert_with(|| {
            debug!(alias = %spec.alias, "generating in-memory key");
            Arc::new(KeyMaterial::generate())
        });
        Ok(KeyHandle::new(spec))
    }

    fn contains(&self, alias: &str) -> VaultResult<bool> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| VaultError::KeyStore("key table poisoned".to_string()))?;
        Ok(keys.contains_key(alias))
    }

    fn use_key(&self, handle: &KeyHandle, op: KeyOperation<'_>) -> VaultResult<Vec<u8>> {
        op.apply(&*self.key(handle.alias())?)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Software key store: one owner-only file per alias
///
/// File layout is the 32 key bytes followed by a 4 byte check value so a
/// truncated or corrupted file is reported instead of silently replaced.
#[derive(Debug)]
pub struct FileKeyStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<KeyMaterial>>>,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{}.key", alias))
    }

    fn read_key(&self, path: &Path) -> VaultResult<KeyMaterial> {
        let mut raw = std::fs::read(path)?;
        if raw.len() != KEY_SIZE + 4 {
            raw.zeroize();
            return Err(VaultError::KeyStore(format!(
                "key file {} has unexpected length",
                path.display()
            )));
        }
        let key = KeyMaterial::from_slice(&raw[..KEY_SIZE]);
        let stored_check = [raw[KEY_SIZE], raw[KEY_SIZE + 1], raw[KEY_SIZE + 2], raw[KEY_SIZE + 3]];
        raw.zeroize();
        let key = key?;
        if key.check_value() != stored_check {
            return Err(VaultError::KeyStore(format!(
                "key file {} failed its check value",
                path.display()
            )));
        }
        Ok(key)
    }

    fn write_key(&self, path: &Path, key: &KeyMaterial) -> VaultResult<()> {
        crate::storage::ensure_private_dir_sync(&self.dir)?;

        let mut raw = Vec::with_capacity(KEY_SIZE + 4);
        raw.extend_from_slice(key.expose());
        raw.extend_from_slice(&key.check_value());

        // Write to temp, then rename
        let temp_path = path.with_extension("key.tmp");
        let result = write_private_file(&temp_path, &raw).and_then(|_| {
            std::fs::rename(&temp_path, path)?;
            Ok(())
        });
        raw.zeroize();
        result
    }

    /// Cached or on-disk key; generated only when `create` is set
    fn load(&self, alias: &str, create: bool) -> VaultResult<Arc<KeyMaterial>> {
        validate_alias(alias)?;
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| VaultError::KeyStore("key cache poisoned".to_string()))?;
        if let Some(key) = cache.get(alias) {
            return Ok(Arc::clone(key));
        }

        let path = self.key_path(alias);
        let key = if path.exists() {
            self.read_key(&path)?
        } else if create {
            let key = KeyMaterial::generate();
            self.write_key(&path, &key)?;
            info!(alias, "provisioned new vault key");
            key
        } else {
            return Err(VaultError::KeyStore(format!("no key for alias {}", alias)));
        };

        let key = Arc::new(key);
        cache.insert(alias.to_string(), Arc::clone(&key));
        Ok(key)
    }
}

impl SecureKeyStore for FileKeyStore {
    fn get_or_create(&self, spec: &VaultKeySpec) -> VaultResult<KeyHandle> {
        self.load(&spec.alias, true)?;
        Ok(KeyHandle::new(spec))
    }

    fn contains(&self, alias: &str) -> VaultResult<bool> {
        validate_alias(alias)?;
        Ok(self.key_path(alias).exists())
    }

    fn use_key(&self, handle: &KeyHandle, op: KeyOperation<'_>) -> VaultResult<Vec<u8>> {
        let key = self.load(handle.alias(), false)?;
        op.apply(&key)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

/// Write `data` to a file readable only by the owner
fn write_private_file(path: &Path, data: &[u8]) -> VaultResult<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
