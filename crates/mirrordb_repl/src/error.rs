//! Error types for replication.

use mirrordb_core::CoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplResult<T> = Result<T, ReplError>;

/// Broad class of a [`ReplError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or out-of-order configuration. Nothing was changed.
    Configuration,
    /// The peer could not be reached.
    Transport,
    /// Checkpoints or peer references are inconsistent.
    Integrity,
    /// The storage layer failed.
    Storage,
}

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplError {
    /// A peer with this name already exists.
    #[error("peer already exists: {name}")]
    DuplicatePeer {
        /// Peer name.
        name: String,
    },

    /// No peer with this name exists.
    #[error("unknown peer: {name}")]
    UnknownPeer {
        /// Peer name.
        name: String,
    },

    /// An address is zero or collides with another participant.
    #[error("invalid address: {message}")]
    InvalidAddress {
        /// What is wrong with it.
        message: String,
    },

    /// The address cannot change once tables replicate.
    #[error("address already configured as {address}")]
    AlreadyConfigured {
        /// The address in effect.
        address: u32,
    },

    /// The operation needs a local address first.
    #[error("replication address not configured")]
    AddressNotConfigured,

    /// A table mode was set before the address.
    #[error("cannot set replication mode of {table} before the address is configured")]
    ModeOutOfOrder {
        /// Table name.
        table: String,
    },

    /// The table does not exist.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Table name.
        table: String,
    },

    /// The table does not accept incoming changes.
    #[error("table {table} does not accept incoming changes")]
    TableNotSubscribed {
        /// Table name.
        table: String,
    },

    /// Local and remote table definitions differ.
    #[error("schema of table {table} differs between peers")]
    SchemaMismatch {
        /// Table name.
        table: String,
    },

    /// An exchange or snapshot for this peer is already running.
    #[error("peer is busy: {name}")]
    PeerBusy {
        /// Peer name.
        name: String,
    },

    /// The orchestrator cannot make this transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The peer could not be reached.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Checkpoint inconsistency or stale peer reference.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Error from the storage layer.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// The background replication thread could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background replication thread panicked.
    #[error("replication loop panicked")]
    LoopPanicked,
}

impl ReplError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    /// Creates an invalid address error.
    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            message: message.into(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplError::Transport { .. } => ErrorKind::Transport,
            ReplError::Integrity(_) | ReplError::LoopPanicked => ErrorKind::Integrity,
            ReplError::Storage(_) | ReplError::Io(_) => ErrorKind::Storage,
            _ => ErrorKind::Configuration,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplError::Transport { retryable, .. } => *retryable,
            ReplError::PeerBusy { .. } => true,
            ReplError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if a background replication loop must stop on this
    /// error rather than log it and try again.
    pub fn is_loop_fatal(&self) -> bool {
        match self.kind() {
            ErrorKind::Integrity => true,
            ErrorKind::Configuration => !matches!(self, ReplError::PeerBusy { .. }),
            ErrorKind::Transport | ErrorKind::Storage => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ReplError::transport_retryable("connection lost").is_retryable());
        assert!(!ReplError::transport_fatal("bad scheme").is_retryable());
        assert!(ReplError::PeerBusy { name: "p".into() }.is_retryable());
        assert!(ReplError::Storage(CoreError::TransactionConflict {
            table: "t".into(),
            key: Some(1)
        })
        .is_retryable());
        assert!(!ReplError::integrity("stale").is_retryable());
    }

    #[test]
    fn kinds() {
        assert_eq!(
            ReplError::UnknownPeer { name: "x".into() }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ReplError::transport_fatal("x").kind(),
            ErrorKind::Transport
        );
        assert_eq!(ReplError::integrity("x").kind(), ErrorKind::Integrity);
        assert_eq!(
            ReplError::Storage(CoreError::DatabaseClosed).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn loop_fatality() {
        assert!(ReplError::integrity("checkpoint ahead of peer").is_loop_fatal());
        assert!(ReplError::UnknownPeer { name: "x".into() }.is_loop_fatal());
        assert!(!ReplError::transport_retryable("down").is_loop_fatal());
        assert!(!ReplError::transport_fatal("down").is_loop_fatal());
        assert!(!ReplError::PeerBusy { name: "x".into() }.is_loop_fatal());
        assert!(!ReplError::Storage(CoreError::DatabaseClosed).is_loop_fatal());
    }
}
