//! Peer registry: named remote endpoints and their checkpoints.

use crate::error::{ReplError, ReplResult};
use mirrordb_core::{
    CoreError, Database, ExchangeCheckpoint, PeerDefinition, PeerRecord, TxnMode,
};
use std::collections::BTreeMap;
use tracing::info;

/// Administrative access to a database's peers.
#[derive(Debug, Clone, Copy)]
pub struct PeerRegistry<'a> {
    db: &'a Database,
}

impl<'a> PeerRegistry<'a> {
    /// Wraps a database.
    #[must_use]
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Registers a peer with zero checkpoints.
    ///
    /// # Errors
    ///
    /// - `DuplicatePeer` if the name is taken
    /// - `AddressNotConfigured` if the local address is unset
    /// - `InvalidAddress` if the remote address equals the local one
    pub fn create_peer(&self, name: &str, definition: PeerDefinition) -> ReplResult<()> {
        self.create_peer_at(name, definition, ExchangeCheckpoint::default())
    }

    /// Registers a peer whose tables start from `baseline` instead of zero.
    ///
    /// Used when the local content is already known to match the peer up
    /// to some sequence, e.g. right after a whole-file copy.
    ///
    /// # Errors
    ///
    /// Same as [`create_peer`](Self::create_peer).
    pub fn create_peer_at(
        &self,
        name: &str,
        definition: PeerDefinition,
        baseline: ExchangeCheckpoint,
    ) -> ReplResult<()> {
        let mut txn = self.db.begin(TxnMode::Exclusive)?;
        let catalog = txn.catalog();
        if catalog.peer(name).is_some() {
            return Err(ReplError::DuplicatePeer {
                name: name.to_string(),
            });
        }
        let local = catalog.address().ok_or(ReplError::AddressNotConfigured)?;
        if definition.remote_address == local {
            return Err(ReplError::invalid_address(format!(
                "peer {name} has the local address {local}"
            )));
        }
        info!(
            locator = %self.db.locator(),
            peer = name,
            remote = %definition.remote_locator,
            remote_address = %definition.remote_address,
            baseline = %baseline.pulled,
            "peer created"
        );
        txn.catalog_mut().insert_peer(PeerRecord {
            name: name.to_string(),
            definition,
            baseline,
            tables: BTreeMap::new(),
        });
        txn.commit()?;
        Ok(())
    }

    /// Removes a peer and its checkpoints. Returns the removed record.
    ///
    /// # Errors
    ///
    /// - `PeerBusy` if an exchange or snapshot with the peer is running
    /// - `UnknownPeer` if no such peer exists
    pub fn drop_peer(&self, name: &str) -> ReplResult<PeerRecord> {
        let _lease = self.db.lease_peer(name).map_err(|e| match e {
            CoreError::PeerLeased { name } => ReplError::PeerBusy { name },
            other => ReplError::Storage(other),
        })?;
        let mut txn = self.db.begin(TxnMode::Exclusive)?;
        let record = txn
            .catalog_mut()
            .remove_peer(name)
            .ok_or_else(|| ReplError::UnknownPeer {
                name: name.to_string(),
            })?;
        txn.commit()?;
        info!(locator = %self.db.locator(), peer = name, "peer dropped");
        Ok(record)
    }

    /// Looks up a peer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if no such peer exists.
    pub fn peer(&self, name: &str) -> ReplResult<PeerRecord> {
        self.db
            .catalog()
            .peer(name)
            .cloned()
            .ok_or_else(|| ReplError::UnknownPeer {
                name: name.to_string(),
            })
    }

    /// All registered peers.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.db.catalog().peers().cloned().collect()
    }

    /// Current checkpoint for a peer and table.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if no such peer exists.
    pub fn checkpoint(&self, name: &str, table: &str) -> ReplResult<ExchangeCheckpoint> {
        Ok(self.peer(name)?.checkpoint(table))
    }
}
