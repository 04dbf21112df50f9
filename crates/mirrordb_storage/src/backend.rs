//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level image store for mirrordb.
///
/// A backend keeps a single opaque byte image. The database owns the image
/// format; the backend only guarantees that a successful [`store`] is
/// atomic: a subsequent [`load`] returns either the previous image or the
/// new one, never a mixture.
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and `memory:` databases
/// - [`super::FileBackend`] - For persistent storage
/// - [`super::EncryptedBackend`] - Encrypting wrapper over another backend
///
/// [`store`]: StorageBackend::store
/// [`load`]: StorageBackend::load
pub trait StorageBackend: Send + Sync {
    /// Loads the current image, or `None` if nothing has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be read or decrypted.
    fn load(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the stored image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be written durably.
    fn store(&mut self, image: &[u8]) -> StorageResult<()>;

    /// Returns the size in bytes of the stored representation.
    fn size(&self) -> u64;

    /// Releases the backend and deletes its stored image.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be removed.
    fn destroy(&mut self) -> StorageResult<()>;
}
