//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// The image lives in a `Vec<u8>` and disappears with the backend. Used for
/// tests and `memory:` locators.
///
/// # Example
///
/// ```rust
/// use mirrordb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert!(backend.load().unwrap().is_none());
/// backend.store(b"v1").unwrap();
/// assert_eq!(backend.size(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    image: RwLock<Option<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory backend holding an existing image.
    #[must_use]
    pub fn with_image(image: Vec<u8>) -> Self {
        Self {
            image: RwLock::new(Some(image)),
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.image.read().clone())
    }

    fn store(&mut self, image: &[u8]) -> StorageResult<()> {
        *self.image.write() = Some(image.to_vec());
        Ok(())
    }

    fn size(&self) -> u64 {
        self.image.read().as_ref().map_or(0, |i| i.len() as u64)
    }

    fn destroy(&mut self) -> StorageResult<()> {
        *self.image.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.load().unwrap().is_none());
        assert_eq!(backend.size(), 0);
    }

    #[test]
    fn store_replaces_image() {
        let mut backend = InMemoryBackend::new();
        backend.store(b"first").unwrap();
        backend.store(b"second image").unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), b"second image");
        assert_eq!(backend.size(), 12);
    }

    #[test]
    fn with_image_preloads() {
        let backend = InMemoryBackend::with_image(vec![1, 2, 3]);
        assert_eq!(backend.load().unwrap().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn destroy_clears() {
        let mut backend = InMemoryBackend::with_image(vec![9]);
        backend.destroy().unwrap();
        assert!(backend.load().unwrap().is_none());
    }
}
