//! Replication catalog records.
//!
//! The catalog is plain data persisted inside the database image. It is
//! read and modified only through a [`Transaction`](crate::Transaction), so
//! catalog changes commit atomically with the row changes beside them.
//! Validation of administrative calls lives in the replication layer.

use crate::locator::Locator;
use crate::types::{Address, SequenceNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which direction a table participates in replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReplicationMode {
    /// Not replicated. No change-log entries, invisible to exchange.
    #[default]
    None,
    /// Local changes are logged and published to peers.
    Out,
    /// Changes from peers are accepted.
    In,
    /// Both publish and accept.
    Both,
}

impl ReplicationMode {
    /// Returns true if local commits to the table are logged.
    #[must_use]
    pub const fn publishes(self) -> bool {
        matches!(self, ReplicationMode::Out | ReplicationMode::Both)
    }

    /// Returns true if the table accepts incoming changes.
    #[must_use]
    pub const fn subscribes(self) -> bool {
        matches!(self, ReplicationMode::In | ReplicationMode::Both)
    }

    /// Returns the mode with the publishing direction added.
    #[must_use]
    pub const fn with_out(self) -> Self {
        match self {
            ReplicationMode::None | ReplicationMode::Out => ReplicationMode::Out,
            ReplicationMode::In | ReplicationMode::Both => ReplicationMode::Both,
        }
    }

    /// Returns the mode with the subscribing direction added.
    #[must_use]
    pub const fn with_in(self) -> Self {
        match self {
            ReplicationMode::None | ReplicationMode::In => ReplicationMode::In,
            ReplicationMode::Out | ReplicationMode::Both => ReplicationMode::Both,
        }
    }
}

/// What to do when an incoming change collides with a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Keep the local row and report the conflict.
    #[default]
    Reject,
    /// Overwrite the local row with the incoming change.
    AcceptIncoming,
    /// The change from the higher address wins.
    HighestAddressWins,
}

/// Per-table replication settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableReplicationInfo {
    /// Replication direction.
    pub mode: ReplicationMode,
    /// Conflict policy. Only meaningful when the mode subscribes.
    pub resolution: ConflictResolution,
}

/// How a peer's locator was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerKind {
    /// Locator given at creation and used as-is.
    AdHoc,
    /// Locator kept for a long-lived relationship.
    Persistent,
}

/// Immutable description of a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerDefinition {
    /// Peer type.
    pub kind: PeerKind,
    /// The address the remote database is expected to carry.
    pub remote_address: Address,
    /// How to reach the remote database.
    pub remote_locator: Locator,
}

impl PeerDefinition {
    /// Creates an ad-hoc peer definition.
    #[must_use]
    pub fn ad_hoc(remote_address: Address, remote_locator: Locator) -> Self {
        Self {
            kind: PeerKind::AdHoc,
            remote_address,
            remote_locator,
        }
    }
}

/// Checkpoint pair for one peer and table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExchangeCheckpoint {
    /// Highest local sequence acknowledged by the peer.
    pub pushed: SequenceNumber,
    /// Highest peer sequence applied locally.
    pub pulled: SequenceNumber,
}

/// A registered peer with its checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Peer name.
    pub name: String,
    /// Connection details.
    pub definition: PeerDefinition,
    /// Starting checkpoint for tables that have not exchanged yet.
    pub baseline: ExchangeCheckpoint,
    /// Per-table checkpoints.
    pub tables: BTreeMap<String, ExchangeCheckpoint>,
}

impl PeerRecord {
    /// Returns the checkpoint for a table, falling back to the baseline.
    #[must_use]
    pub fn checkpoint(&self, table: &str) -> ExchangeCheckpoint {
        self.tables.get(table).copied().unwrap_or(self.baseline)
    }

    /// Highest sequence of the peer known to have been pulled, over the
    /// baseline and every table.
    #[must_use]
    pub fn pulled_high_water(&self) -> SequenceNumber {
        self.tables
            .values()
            .map(|cp| cp.pulled)
            .fold(self.baseline.pulled, SequenceNumber::max)
    }
}

/// The replication catalog of one database.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicationCatalog {
    address: Option<Address>,
    tables: BTreeMap<String, TableReplicationInfo>,
    peers: BTreeMap<String, PeerRecord>,
}

impl ReplicationCatalog {
    /// Returns the configured address.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        self.address
    }

    /// Sets the address.
    pub fn set_address(&mut self, address: Option<Address>) {
        self.address = address;
    }

    /// Returns the replication settings of a table (mode `None` if unset).
    #[must_use]
    pub fn table_info(&self, table: &str) -> TableReplicationInfo {
        self.tables.get(table).copied().unwrap_or_default()
    }

    /// Sets the replication settings of a table.
    pub fn set_table_info(&mut self, table: &str, info: TableReplicationInfo) {
        if info.mode == ReplicationMode::None {
            self.tables.remove(table);
        } else {
            self.tables.insert(table.to_string(), info);
        }
    }

    /// Iterates over tables with a mode other than `None`.
    pub fn replicated_tables(&self) -> impl Iterator<Item = (&str, TableReplicationInfo)> {
        self.tables.iter().map(|(name, info)| (name.as_str(), *info))
    }

    /// Returns true if any table is replicated.
    #[must_use]
    pub fn has_replicated_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// Looks up a peer by name.
    #[must_use]
    pub fn peer(&self, name: &str) -> Option<&PeerRecord> {
        self.peers.get(name)
    }

    /// Iterates over all peers.
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Inserts or replaces a peer record.
    pub fn insert_peer(&mut self, record: PeerRecord) {
        self.peers.insert(record.name.clone(), record);
    }

    /// Removes a peer and its checkpoints.
    pub fn remove_peer(&mut self, name: &str) -> Option<PeerRecord> {
        self.peers.remove(name)
    }

    /// Raises the checkpoints of a peer/table pair. Never lowers them.
    ///
    /// Returns false if the peer does not exist.
    pub fn advance_checkpoint(
        &mut self,
        peer: &str,
        table: &str,
        pushed: SequenceNumber,
        pulled: SequenceNumber,
    ) -> bool {
        let Some(record) = self.peers.get_mut(peer) else {
            return false;
        };
        let current = record.checkpoint(table);
        record.tables.insert(
            table.to_string(),
            ExchangeCheckpoint {
                pushed: current.pushed.max(pushed),
                pulled: current.pulled.max(pulled),
            },
        );
        true
    }

    /// Sets the pulled checkpoint of a peer/table pair unconditionally.
    ///
    /// Used after a snapshot, which re-bases the table on the peer's
    /// current sequence. Returns false if the peer does not exist.
    pub fn reset_pulled(&mut self, peer: &str, table: &str, pulled: SequenceNumber) -> bool {
        let Some(record) = self.peers.get_mut(peer) else {
            return false;
        };
        let mut checkpoint = record.checkpoint(table);
        checkpoint.pulled = pulled;
        record.tables.insert(table.to_string(), checkpoint);
        true
    }
}
