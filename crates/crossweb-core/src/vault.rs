//! Secure vault: one durable AES-256-GCM key behind a user-presence gate
//!
//! `encrypt` / `decrypt` need a passing presence check; `save` / `load` only
//! move ciphertext and never prompt. Prompts are serialized: a second
//! operation arriving while a prompt is showing waits behind it (FIFO) and
//! then reuses the result if it is still inside the validity window.
//!
//! Nothing here retries. Failures go back to the caller as typed errors.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::Authenticator;
use crate::crypto::{generate_iv, EncryptedBlob};
use crate::error::{VaultError, VaultResult};
use crate::keystore::{KeyHandle, KeyOperation, SecureKeyStore};
use crate::models::{AuthenticationResult, PromptInfo, VaultConfig, VaultKeySpec};
use crate::storage::BlobStore;

/// Snapshot of the vault for status output
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VaultStatus {
    pub alias: String,
    pub key_provisioned: bool,
    pub blob_saved: bool,
    pub auth_required: bool,
    pub auth_available: bool,
    pub auth_method: String,
    pub key_backend: String,
}

/// Vault bound to one key alias
pub struct SecureVault {
    spec: VaultKeySpec,
    prompt: PromptInfo,
    key_store: Arc<dyn SecureKeyStore>,
    authenticator: Arc<dyn Authenticator>,
    blobs: Arc<dyn BlobStore>,
    /// Held for the duration of a prompt; records the last passing check
    presence: Mutex<Option<Instant>>,
}

impl SecureVault {
    pub fn new(
        spec: VaultKeySpec,
        key_store: Arc<dyn SecureKeyStore>,
        authenticator: Arc<dyn Authenticator>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            spec,
            prompt: PromptInfo::default(),
            key_store,
            authenticator,
            blobs,
            presence: Mutex::new(None),
        }
    }

    /// Build from configuration
    pub fn from_config(
        config: &VaultConfig,
        key_store: Arc<dyn SecureKeyStore>,
        authenticator: Arc<dyn Authenticator>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self::new(config.key_spec(), key_store, authenticator, blobs).with_prompt(config.prompt())
    }

    pub fn with_prompt(mut self, prompt: PromptInfo) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn alias(&self) -> &str {
        &self.spec.alias
    }

    pub fn spec(&self) -> &VaultKeySpec {
        &self.spec
    }

    /// Return the key handle, provisioning the key on first use
    pub fn get_or_create_key(&self) -> VaultResult<KeyHandle> {
        self.key_store.get_or_create(&self.spec)
    }

    /// Run the presence prompt once, without consulting the validity window
    pub async fn authenticate(&self) -> AuthenticationResult {
        let mut last_pass = self.presence.lock().await;
        let result = self.authenticator.prompt_user_presence(&self.prompt).await;
        *last_pass = result.success.then(Instant::now);
        result
    }

    /// Wait for a passing presence check, reusing a recent one if still valid
    async fn require_presence(&self) -> VaultResult<()> {
        if !self.spec.auth_required {
            return Ok(());
        }

        // Queue behind any prompt already showing
        let mut last_pass = self.presence.lock().await;
        if let Some(at) = *last_pass {
            if at.elapsed() < self.spec.auth_validity() {
                debug!(alias = %self.spec.alias, "presence check still valid");
                return Ok(());
            }
        }

        let result = self.authenticator.prompt_user_presence(&self.prompt).await;
        if result.success {
            *last_pass = Some(Instant::now());
            return Ok(());
        }

        *last_pass = None;
        if result.method_available {
            warn!(alias = %self.spec.alias, "user-presence check failed");
            Err(VaultError::AuthenticationFailed(result.reason))
        } else {
            warn!(alias = %self.spec.alias, "no user-presence method available");
            Err(VaultError::AuthenticationUnavailable(result.reason))
        }
    }

    /// Provision the key if needed and run `op` on the blocking pool
    ///
    /// Key stores do file or Keychain I/O, which must stay off the async
    /// workers.
    async fn with_key<F>(&self, op: F) -> VaultResult<Vec<u8>>
    where
        F: FnOnce(&dyn SecureKeyStore, &KeyHandle) -> VaultResult<Vec<u8>> + Send + 'static,
    {
        let key_store = Arc::clone(&self.key_store);
        let spec = self.spec.clone();
        tokio::task::spawn_blocking(move || {
            let handle = key_store.get_or_create(&spec)?;
            op(key_store.as_ref(), &handle)
        })
        .await
        .map_err(|e| VaultError::KeyStore(format!("key task failed: {}", e)))?
    }

    /// Encrypt `plaintext` under a fresh IV
    pub async fn encrypt(&self, plaintext: &[u8]) -> VaultResult<EncryptedBlob> {
        self.require_presence().await?;

        let iv = generate_iv();
        let len = plaintext.len();
        let plaintext = Zeroizing::new(plaintext.to_vec());
        let ciphertext = self
            .with_key(move |store, handle| {
                store.use_key(handle, KeyOperation::Seal { iv: &iv, plaintext: &plaintext })
            })
            .await?;

        debug!(alias = %self.spec.alias, bytes = len, "encrypted payload");
        Ok(EncryptedBlob::new(iv, ciphertext))
    }

    /// Decrypt and verify a blob. Fails closed on any integrity error.
    pub async fn decrypt(&self, blob: &EncryptedBlob) -> VaultResult<Vec<u8>> {
        self.require_presence().await?;

        let blob = blob.clone();
        let plaintext = self
            .with_key(move |store, handle| {
                store.use_key(
                    handle,
                    KeyOperation::Open {
                        iv: &blob.iv,
                        ciphertext: &blob.ciphertext,
                    },
                )
            })
            .await?;

        debug!(alias = %self.spec.alias, "decrypted payload");
        Ok(plaintext)
    }

    /// Persist a base64 blob exactly as given
    pub async fn save(&self, blob: &str) -> VaultResult<()> {
        EncryptedBlob::from_base64(blob)?;
        self.blobs.save(&self.spec.alias, blob).await?;
        info!(alias = %self.spec.alias, "stored encrypted blob");
        Ok(())
    }

    /// Retrieve the stored blob, `None` if nothing was saved
    pub async fn load(&self) -> VaultResult<Option<String>> {
        self.blobs.load(&self.spec.alias).await
    }

    pub async fn status(&self) -> VaultResult<VaultStatus> {
        Ok(VaultStatus {
            alias: self.spec.alias.clone(),
            key_provisioned: self.key_store.contains(&self.spec.alias)?,
            blob_saved: self.load().await?.is_some(),
            auth_required: self.spec.auth_required,
            auth_available: self.authenticator.is_available(),
            auth_method: self.authenticator.method().to_string(),
            key_backend: self.key_store.backend().to_string(),
        })
    }
}

impl std::fmt::Debug for SecureVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureVault")
            .field("alias", &self.spec.alias)
            .field("key_backend", &self.key_store.backend())
            .field("auth_method", &self.authenticator.method())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NoopAuthenticator, UnavailableAuthenticator};
    use crate::keystore::MemoryKeyStore;
    use crate::storage::MemoryBlobStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Authenticator with a switchable verdict that counts prompts
    #[derive(Default)]
    struct ScriptedAuthenticator {
        deny: AtomicBool,
        prompts: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Authenticator for ScriptedAuthenticator {
        async fn prompt_user_presence(&self, _prompt: &PromptInfo) -> AuthenticationResult {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.deny.load(Ordering::SeqCst) {
                AuthenticationResult::failed("Authentication failed")
            } else {
                AuthenticationResult::passed()
            }
        }

        fn method(&self) -> &'static str {
            "scripted"
        }
    }

    /// Blob store that records whether it was touched
    #[derive(Default)]
    struct TouchedBlobStore {
        inner: MemoryBlobStore,
        touched: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for TouchedBlobStore {
        async fn save(&self, alias: &str, blob: &str) -> VaultResult<()> {
            self.touched.store(true, Ordering::SeqCst);
            self.inner.save(alias, blob).await
        }

        async fn load(&self, alias: &str) -> VaultResult<Option<String>> {
            self.touched.store(true, Ordering::SeqCst);
            self.inner.load(alias).await
        }

        async fn remove(&self, alias: &str) -> VaultResult<bool> {
            self.touched.store(true, Ordering::SeqCst);
            self.inner.remove(alias).await
        }
    }

    fn vault_with(auth: Arc<dyn Authenticator>) -> SecureVault {
        SecureVault::new(
            VaultKeySpec::new("test.vault"),
            Arc::new(MemoryKeyStore::new()),
            auth,
            Arc::new(MemoryBlobStore::new()),
        )
    }

    #[tokio::test]
    async fn test_roundtrip_various_lengths() {
        let vault = vault_with(Arc::new(NoopAuthenticator));
        for len in [0usize, 1, 15, 16, 17, 32, 255, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let blob = vault.encrypt(&plaintext).await.unwrap();
            let reparsed = EncryptedBlob::from_base64(&blob.to_base64()).unwrap();
            assert_eq!(vault.decrypt(&reparsed).await.unwrap(), plaintext);
        }
    }

    #[tokio::test]
    async fn test_fresh_iv_per_encryption() {
        let vault = vault_with(Arc::new(NoopAuthenticator));
        let a = vault.encrypt(b"same").await.unwrap();
        let b = vault.encrypt(b"same").await.unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn test_any_bit_flip_fails_integrity() {
        let vault = vault_with(Arc::new(NoopAuthenticator));
        let blob = vault.encrypt(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        let bytes = blob.to_bytes();

        for byte in 0..bytes.len() {
            for bit in 0..8 {
                let mut tampered = bytes.clone();
                tampered[byte] ^= 1 << bit;
                let tampered = EncryptedBlob::from_bytes(&tampered).unwrap();
                let result = vault.decrypt(&tampered).await;
                assert!(
                    matches!(result, Err(VaultError::CryptoIntegrity)),
                    "flip of byte {} bit {} was not detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[tokio::test]
    async fn test_failed_auth_gates_everything() {
        let auth = Arc::new(ScriptedAuthenticator::default());
        auth.deny.store(true, Ordering::SeqCst);
        let blobs = Arc::new(TouchedBlobStore::default());
        let key_store = Arc::new(MemoryKeyStore::new());
        let vault = SecureVault::new(
            VaultKeySpec::new("gated"),
            key_store.clone(),
            auth.clone(),
            blobs.clone(),
        );

        let encrypted = vault.encrypt(b"secret").await;
        assert!(matches!(encrypted, Err(VaultError::AuthenticationFailed(_))));

        let fake = EncryptedBlob::new([0u8; 12], vec![0u8; 32]);
        let decrypted = vault.decrypt(&fake).await;
        assert!(matches!(decrypted, Err(VaultError::AuthenticationFailed(_))));

        assert!(!blobs.touched.load(Ordering::SeqCst));
        // The key is not provisioned before a passing check
        assert!(!key_store.contains("gated").unwrap());
    }

    #[tokio::test]
    async fn test_file_backed_vault_reopens_key() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let keys = temp_dir.path().join("keys");
        let open = || {
            SecureVault::new(
                VaultKeySpec::new("on.disk"),
                Arc::new(crate::keystore::FileKeyStore::new(&keys)),
                Arc::new(NoopAuthenticator),
                Arc::new(MemoryBlobStore::new()),
            )
        };

        let blob = open().encrypt(b"persisted").await.unwrap();
        assert_eq!(open().decrypt(&blob).await.unwrap(), b"persisted");
        assert!(keys.join("on.disk.key").exists());
    }

    #[tokio::test]
    async fn test_unavailable_auth_is_distinct() {
        let vault = vault_with(Arc::new(UnavailableAuthenticator::default()));
        let result = vault.encrypt(b"secret").await;
        assert!(matches!(result, Err(VaultError::AuthenticationUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validity_window_skips_prompt() {
        let auth = Arc::new(ScriptedAuthenticator::default());
        let vault = vault_with(auth.clone());

        let blob = vault.encrypt(b"one").await.unwrap();
        vault.decrypt(&blob).await.unwrap();
        assert_eq!(auth.prompts.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        vault.encrypt(b"two").await.unwrap();
        assert_eq!(auth.prompts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_prompt_clears_window() {
        let auth = Arc::new(ScriptedAuthenticator::default());
        let vault = vault_with(auth.clone());

        vault.encrypt(b"ok").await.unwrap();
        auth.deny.store(true, Ordering::SeqCst);
        // Explicit authenticate always prompts
        assert!(!vault.authenticate().await.success);
        assert!(matches!(
            vault.encrypt(b"denied").await,
            Err(VaultError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_auth_not_required_never_prompts() {
        let auth = Arc::new(ScriptedAuthenticator::default());
        auth.deny.store(true, Ordering::SeqCst);
        let mut spec = VaultKeySpec::new("open");
        spec.auth_required = false;
        let vault = SecureVault::new(
            spec,
            Arc::new(MemoryKeyStore::new()),
            auth.clone(),
            Arc::new(MemoryBlobStore::new()),
        );

        let blob = vault.encrypt(b"data").await.unwrap();
        assert_eq!(vault.decrypt(&blob).await.unwrap(), b"data");
        assert_eq!(auth.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_operations_queue_behind_one_prompt() {
        let auth = Arc::new(ScriptedAuthenticator {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let mut spec = VaultKeySpec::new("queued");
        spec.auth_validity_seconds = 0;
        let vault = Arc::new(SecureVault::new(
            spec,
            Arc::new(MemoryKeyStore::new()),
            auth.clone(),
            Arc::new(MemoryBlobStore::new()),
        ));

        let tasks: Vec<_> = (0..4u8)
            .map(|i| {
                let vault = Arc::clone(&vault);
                tokio::spawn(async move { (i, vault.encrypt(&[i; 8]).await) })
            })
            .collect();

        for task in tasks {
            let (i, result) = task.await.unwrap();
            let blob = result.unwrap();
            assert_eq!(vault.decrypt(&blob).await.unwrap(), vec![i; 8]);
        }

        assert_eq!(auth.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(auth.prompts.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_save_load() {
        let vault = vault_with(Arc::new(NoopAuthenticator));
        assert_eq!(vault.load().await.unwrap(), None);

        let blob = vault.encrypt(b"persist me").await.unwrap().to_base64();
        vault.save(&blob).await.unwrap();
        assert_eq!(vault.load().await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn test_save_rejects_malformed_blob() {
        let vault = vault_with(Arc::new(NoopAuthenticator));
        let result = vault.save("definitely not a blob").await;
        assert!(matches!(result, Err(VaultError::MalformedBlob(_))));
        assert_eq!(vault.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_status() {
        let vault = vault_with(Arc::new(NoopAuthenticator));
        let status = vault.status().await.unwrap();
        assert!(!status.key_provisioned);
        assert!(!status.blob_saved);

        vault.get_or_create_key().unwrap();
        let status = vault.status().await.unwrap();
        assert!(status.key_provisioned);
        assert_eq!(status.key_backend, "memory");
        assert_eq!(status.auth_method, "none");
    }
}
