//! Cryptographic operations for the vault
//!
//! - AES-256-GCM with a fresh random 96-bit IV per encryption
//! - Blob layout `iv || ciphertext || tag`, base64 for storage and transit
//! - Key material held in `secrecy::Secret` and zeroized on drop

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{VaultError, VaultResult};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM IV in bytes
pub const IV_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Raw AES-256 key. Only key stores construct and hold these.
pub struct KeyMaterial {
    key: Secret<[u8; KEY_SIZE]>,
}

impl KeyMaterial {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        let key = Self::from_array(bytes);
        bytes.zeroize();
        key
    }

    fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Secret::new(bytes),
        }
    }

    /// Rebuild a key from stored bytes
    pub fn from_slice(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(VaultError::KeyStore(format!(
                "expected {} key bytes, found {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut array = [0u8; KEY_SIZE];
        array.copy_from_slice(bytes);
        let key = Self::from_array(array);
        array.zeroize();
        Ok(key)
    }

    /// Borrow the raw bytes for persistence inside a key store
    pub fn expose(&self) -> &[u8; KEY_SIZE] {
        self.key.expose_secret()
    }

    fn cipher(&self) -> VaultResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.expose_secret())
            .map_err(|e| VaultError::EncryptionError(e.to_string()))
    }

    /// Encrypt under `iv`, returning ciphertext with the tag appended
    pub fn seal(&self, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        self.cipher()?
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|e| VaultError::EncryptionError(e.to_string()))
    }

    /// Decrypt and verify. Any tag mismatch is a `CryptoIntegrity` error.
    pub fn open(&self, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> VaultResult<Vec<u8>> {
        self.cipher()?
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| VaultError::CryptoIntegrity)
    }

    /// Short SHA-256 based check value, used to detect a corrupted key file
    pub fn check_value(&self) -> [u8; 4] {
        let mut hasher = Sha256::new();
        hasher.update(b"crossweb-key-check");
        hasher.update(self.key.expose_secret());
        let digest = hasher.finalize();
        [digest[0], digest[1], digest[2], digest[3]]
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Generate a cryptographically secure random IV
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Authenticated ciphertext as produced by the vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub iv: [u8; IV_SIZE],
    /// Ciphertext followed by the 16-byte tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    pub fn new(iv: [u8; IV_SIZE], ciphertext: Vec<u8>) -> Self {
        Self { iv, ciphertext }
    }

    /// The GCM authentication tag
    pub fn tag(&self) -> &[u8] {
        &self.ciphertext[self.ciphertext.len().saturating_sub(TAG_SIZE)..]
    }

    /// `iv || ciphertext || tag`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() < IV_SIZE + TAG_SIZE {
            return Err(VaultError::MalformedBlob(format!(
                "blob must be at least {} bytes, found {}",
                IV_SIZE + TAG_SIZE,
                bytes.len()
            )));
        }
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[..IV_SIZE]);
        Ok(Self {
            iv,
            ciphertext: bytes[IV_SIZE..].to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Parse a base64 blob. Embedded whitespace (line-wrapped base64) is ignored.
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| VaultError::MalformedBlob(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}
