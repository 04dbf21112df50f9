//! Error types for mirrordb core.

use crate::types::RowKey;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core database operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] mirrordb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database image could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Table not found.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Name of the table.
        name: String,
    },

    /// Table already exists.
    #[error("table already exists: {name}")]
    TableExists {
        /// Name of the table.
        name: String,
    },

    /// A row or table definition does not fit the table schema.
    #[error("schema mismatch on table {table}: {message}")]
    SchemaMismatch {
        /// Table involved.
        table: String,
        /// What did not match.
        message: String,
    },

    /// Insert of a key that is already present.
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey {
        /// Table involved.
        table: String,
        /// The conflicting primary key.
        key: RowKey,
    },

    /// A shared transaction read data that changed before it committed.
    #[error("transaction conflict on table {table}, key {key:?}")]
    TransactionConflict {
        /// Table involved.
        table: String,
        /// Row key, or `None` for a catalog conflict.
        key: Option<RowKey>,
    },

    /// No database exists at the locator.
    #[error("database not found: {locator}")]
    DatabaseNotFound {
        /// The locator that was opened.
        locator: String,
    },

    /// A database already exists at the locator.
    #[error("database already exists: {locator}")]
    DatabaseExists {
        /// The locator in question.
        locator: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// The locator string could not be parsed.
    #[error("invalid locator: {message}")]
    InvalidLocator {
        /// Description of the problem.
        message: String,
    },

    /// The locator names a scheme this build cannot reach.
    #[error("unsupported locator scheme: {scheme}")]
    UnsupportedScheme {
        /// The scheme that was requested.
        scheme: String,
    },

    /// The named peer is already leased by a running operation.
    #[error("peer is in use: {name}")]
    PeerLeased {
        /// Peer name.
        name: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid locator error.
    pub fn invalid_locator(message: impl Into<String>) -> Self {
        Self::InvalidLocator {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::TransactionConflict { .. } | CoreError::PeerLeased { .. }
        )
    }
}
