//! Platform-specific key storage and user-presence checks
//!
//! - macOS: key material in the login Keychain
//! - Others: owner-only key files
//!
//! No platform prompt is wired in yet, so the platform authenticator reports
//! `authentication_unavailable` everywhere instead of passing unchecked.
//! Hosts that accept that risk select `[auth] method = "none"`.

use std::path::Path;
use std::sync::Arc;

use crate::auth::{Authenticator, UnavailableAuthenticator};
use crate::keystore::SecureKeyStore;

/// Keychain service name for vault keys
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
const SERVICE_NAME: &str = "com.crossweb.keystore";

/// Reason reported by the platform authenticator
const NO_PROMPT_REASON: &str =
    "no user-presence prompt is available on this platform; set [auth] method = \"none\" only in test environments";

/// Name of the platform, as reported to plugins
pub fn platform_name() -> &'static str {
    std::env::consts::OS
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use security_framework::passwords::{get_generic_password, set_generic_password};
    use tracing::info;
    use zeroize::Zeroize;

    use crate::crypto::KeyMaterial;
    use crate::error::{VaultError, VaultResult};
    use crate::keystore::{validate_alias, KeyHandle, KeyOperation};
    use crate::models::VaultKeySpec;

    /// errSecItemNotFound
    const ITEM_NOT_FOUND: i32 = -25300;

    /// Vault keys stored as Keychain generic passwords
    #[derive(Debug, Default)]
    pub struct KeychainKeyStore;

    impl KeychainKeyStore {
        fn read(&self, alias: &str) -> VaultResult<Option<KeyMaterial>> {
            match get_generic_password(SERVICE_NAME, alias) {
                Ok(mut raw) => {
                    let key = KeyMaterial::from_slice(&raw);
                    raw.zeroize();
                    key.map(Some)
                }
                Err(e) if e.code() == ITEM_NOT_FOUND => Ok(None),
                Err(e) => Err(VaultError::KeyStore(e.to_string())),
            }
        }

        fn load_or_create(&self, alias: &str) -> VaultResult<KeyMaterial> {
            validate_alias(alias)?;
            if let Some(key) = self.read(alias)? {
                return Ok(key);
            }
            let key = KeyMaterial::generate();
            set_generic_password(SERVICE_NAME, alias, key.expose())
                .map_err(|e| VaultError::KeyStore(e.to_string()))?;
            info!(alias, "provisioned new vault key in Keychain");
            Ok(key)
        }
    }

    impl SecureKeyStore for KeychainKeyStore {
        fn get_or_create(&self, spec: &VaultKeySpec) -> VaultResult<KeyHandle> {
            self.load_or_create(&spec.alias)?;
            Ok(KeyHandle::new(spec))
        }

        fn contains(&self, alias: &str) -> VaultResult<bool> {
            validate_alias(alias)?;
            Ok(self.read(alias)?.is_some())
        }

        fn use_key(&self, handle: &KeyHandle, op: KeyOperation<'_>) -> VaultResult<Vec<u8>> {
            validate_alias(handle.alias())?;
            let key = self.read(handle.alias())?.ok_or_else(|| {
                VaultError::KeyStore(format!("no key for alias {}", handle.alias()))
            })?;
            op.apply(&key)
        }

        fn backend(&self) -> &'static str {
            "keychain"
        }
    }
}

#[cfg(target_os = "macos")]
pub use macos::*;

/// Authenticator backed by the operating system
pub fn platform_authenticator() -> Arc<dyn Authenticator> {
    Arc::new(UnavailableAuthenticator::new(NO_PROMPT_REASON))
}

/// Most secure key store available on this platform
pub fn platform_key_store(base_dir: &Path) -> Arc<dyn SecureKeyStore> {
    #[cfg(target_os = "macos")]
    {
        let _ = base_dir;
        Arc::new(KeychainKeyStore)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(crate::keystore::FileKeyStore::new(
            crate::storage::key_dir_path(base_dir),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PromptInfo;

    #[test]
    fn test_platform_name() {
        assert!(!platform_name().is_empty());
    }

    #[tokio::test]
    async fn test_platform_authenticator_never_passes_unprompted() {
        let auth = platform_authenticator();
        assert!(!auth.is_available());

        let result = auth.prompt_user_presence(&PromptInfo::default()).await;
        assert!(!result.success);
        assert!(!result.method_available);
    }

    #[tokio::test]
    async fn test_platform_vault_refuses_encrypt() {
        let vault = crate::vault::SecureVault::new(
            crate::models::VaultKeySpec::new("platform.test"),
            Arc::new(crate::keystore::MemoryKeyStore::new()),
            platform_authenticator(),
            Arc::new(crate::storage::MemoryBlobStore::new()),
        );
        let err = vault.encrypt(b"secret").await.unwrap_err();
        assert_eq!(
            crate::error::CommandError::from(err).kind,
            crate::error::ErrorKind::AuthenticationUnavailable
        );
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_fallback_key_store_is_file_backed() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = platform_key_store(temp_dir.path());
        assert_eq!(store.backend(), "file");
    }
}
