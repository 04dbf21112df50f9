//! # mirrordb storage
//!
//! Storage backends for mirrordb database images.
//!
//! A backend holds exactly one opaque byte image: the serialized state of a
//! database. The database layer loads the image at open time and replaces it
//! wholesale on every commit. Backends never interpret the bytes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and `memory:` locators
//! - [`FileBackend`] - Persistent single-file storage with an exclusive lock
//! - [`EncryptedBackend`] - Wrapper that adds AES-256-GCM encryption at rest
//!
//! ## Example
//!
//! ```rust
//! use mirrordb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.store(b"image bytes").unwrap();
//! assert_eq!(backend.load().unwrap().as_deref(), Some(&b"image bytes"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod encrypted;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use encrypted::{EncryptedBackend, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
