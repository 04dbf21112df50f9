//! Encrypted storage backend wrapper.
//!
//! Wraps any other backend with AES-256-GCM encryption at rest. Every
//! stored image is sealed independently:
//!
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//!
//! A fresh random nonce is drawn for each store. Keys are never persisted;
//! the application must supply the same key to read the image back.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const KDF_INFO: &[u8] = b"mirrordb image key v1";

/// Encryption key for the encrypted backend.
///
/// Zeroized on drop. The `Debug` output never shows key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Derives a key from a passphrase with HKDF-SHA256.
    ///
    /// The same passphrase and salt always yield the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the passphrase is empty.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> StorageResult<Self> {
        if passphrase.is_empty() {
            return Err(StorageError::Encryption("empty passphrase".to_string()));
        }
        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut bytes)
            .map_err(|e| StorageError::Encryption(format!("key derivation failed: {e}")))?;
        Ok(Self { bytes })
    }

    /// Returns the key as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A storage backend that encrypts the image before handing it to an
/// inner backend.
///
/// # Example
///
/// ```rust
/// use mirrordb_storage::{EncryptedBackend, EncryptionKey, InMemoryBackend, StorageBackend};
///
/// let key = EncryptionKey::from_bytes(&[7u8; 32]).unwrap();
/// let mut backend = EncryptedBackend::new(Box::new(InMemoryBackend::new()), key).unwrap();
/// backend.store(b"secret").unwrap();
/// assert_eq!(backend.load().unwrap().unwrap(), b"secret");
/// ```
pub struct EncryptedBackend {
    inner: Box<dyn StorageBackend>,
    cipher: Aes256Gcm,
}

impl EncryptedBackend {
    /// Creates a new encrypted backend wrapping the given inner backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the cipher cannot be initialized.
    pub fn new(inner: Box<dyn StorageBackend>, key: EncryptionKey) -> StorageResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StorageError::Encryption(format!("invalid key: {e}")))?;
        Ok(Self { inner, cipher })
    }

    fn seal(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StorageError::Encryption("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> StorageResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StorageError::Encryption("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                StorageError::Encryption(
                    "authentication failed: wrong key or corrupted image".to_string(),
                )
            })
    }
}

impl std::fmt::Debug for EncryptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBackend")
            .field("size", &self.inner.size())
            .finish_non_exhaustive()
    }
}

impl StorageBackend for EncryptedBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        match self.inner.load()? {
            Some(sealed) => self.open(&sealed).map(Some),
            None => Ok(None),
        }
    }

    fn store(&mut self, image: &[u8]) -> StorageResult<()> {
        let sealed = self.seal(image)?;
        self.inner.store(&sealed)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn destroy(&mut self) -> StorageResult<()> {
        self.inner.destroy()
    }
}
