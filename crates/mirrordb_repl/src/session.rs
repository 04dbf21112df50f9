//! Peer connections and per-round sessions.

use crate::error::{ReplError, ReplResult};
use mirrordb_core::{
    Address, Config, CoreError, Database, EncryptionKey, Environment, OpenMode, PeerDefinition,
    PeerLease, PeerRecord,
};
use std::sync::Arc;
use tracing::debug;

/// Resolves a peer definition into a live database handle.
pub trait PeerConnector: Send + Sync {
    /// Opens the database the definition points at.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error if the peer cannot be reached.
    fn connect(&self, definition: &PeerDefinition) -> ReplResult<Arc<Database>>;
}

/// Connects to peers through an [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvironmentConnector {
    env: Environment,
    key: Option<EncryptionKey>,
}

impl EnvironmentConnector {
    /// Creates a connector over `env`.
    #[must_use]
    pub fn new(env: Environment) -> Self {
        Self { env, key: None }
    }

    /// Uses `key` when a peer database has to be opened from disk.
    #[must_use]
    pub fn with_key(mut self, key: Option<EncryptionKey>) -> Self {
        self.key = key;
        self
    }
}

impl PeerConnector for EnvironmentConnector {
    fn connect(&self, definition: &PeerDefinition) -> ReplResult<Arc<Database>> {
        let config = Config::new()
            .open_mode(OpenMode::OpenExisting)
            .with_optional_key(self.key.clone());
        let db = self
            .env
            .open(&definition.remote_locator, config)
            .map_err(|e| connect_error(&definition.remote_locator.to_string(), e))?;
        if db.is_closed() {
            return Err(ReplError::transport_retryable(format!(
                "{} is closed",
                definition.remote_locator
            )));
        }
        Ok(db)
    }
}

fn connect_error(locator: &str, err: CoreError) -> ReplError {
    match err {
        CoreError::UnsupportedScheme { .. } | CoreError::InvalidLocator { .. } => {
            ReplError::transport_fatal(format!("{locator}: {err}"))
        }
        other => ReplError::transport_retryable(format!("{locator}: {other}")),
    }
}

/// One live interaction with a peer.
///
/// Built fresh for every exchange round or snapshot and dropped afterwards.
/// Holding a session leases the peer name, so the definition cannot be
/// dropped and no second round for the same peer can start meanwhile.
pub(crate) struct PeerSession<'a> {
    record: PeerRecord,
    local_address: Address,
    remote: Arc<Database>,
    _lease: PeerLease<'a>,
}

impl<'a> PeerSession<'a> {
    pub(crate) fn open(
        local: &'a Database,
        connector: &dyn PeerConnector,
        name: &str,
    ) -> ReplResult<Self> {
        let lease = local.lease_peer(name).map_err(|e| match e {
            CoreError::PeerLeased { name } => ReplError::PeerBusy { name },
            other => ReplError::Storage(other),
        })?;
        let catalog = local.catalog();
        let local_address = catalog.address().ok_or(ReplError::AddressNotConfigured)?;
        let record = catalog
            .peer(name)
            .cloned()
            .ok_or_else(|| ReplError::UnknownPeer {
                name: name.to_string(),
            })?;

        let remote = connector.connect(&record.definition)?;
        let expected = record.definition.remote_address;
        match remote.address() {
            Some(actual) if actual == expected => {}
            actual => {
                return Err(ReplError::integrity(format!(
                    "peer {name} at {} has address {}, expected {expected}",
                    record.definition.remote_locator,
                    actual.map_or_else(|| "none".to_string(), |a| a.to_string()),
                )));
            }
        }
        debug!(peer = name, remote = %record.definition.remote_locator, "session opened");
        Ok(Self {
            record,
            local_address,
            remote,
            _lease: lease,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.record.name
    }

    pub(crate) fn record(&self) -> &PeerRecord {
        &self.record
    }

    pub(crate) fn local_address(&self) -> Address {
        self.local_address
    }

    pub(crate) fn remote_address(&self) -> Address {
        self.record.definition.remote_address
    }

    pub(crate) fn remote(&self) -> &Database {
        &self.remote
    }
}
