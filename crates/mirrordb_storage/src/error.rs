//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stored image is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The storage has been destroyed or closed.
    #[error("storage is closed")]
    Closed,

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Another handle already holds the storage lock.
    #[error("storage is locked by another process: {}", .0.display())]
    Locked(PathBuf),
}
