//! Conflict detection results and resolution policies.

use mirrordb_core::{Address, ConflictResolution, RowKey, Value};

/// Which half of an exchange round found the conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDirection {
    /// Applying local changes at the peer.
    Push,
    /// Applying the peer's changes locally.
    Pull,
}

/// What the policy decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// The receiving side kept its row.
    KeptLocal,
    /// The incoming change replaced the receiving side's row.
    AcceptedIncoming,
}

/// An incoming change that collided with a write made on the receiving side.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Table name.
    pub table: String,
    /// Primary key of the row.
    pub key: RowKey,
    /// Address the incoming change came from.
    pub origin: Address,
    /// Address of the side that received it.
    pub receiver: Address,
    /// The receiving side's row before resolution.
    pub local: Vec<Value>,
    /// The incoming row, or `None` for a delete.
    pub incoming: Option<Vec<Value>>,
    /// Policy that was applied.
    pub resolution: ConflictResolution,
    /// What the policy decided.
    pub outcome: ConflictOutcome,
    /// Where in the round it happened.
    pub direction: ConflictDirection,
}

impl Conflict {
    /// Returns true if the incoming change was rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.outcome == ConflictOutcome::KeptLocal
    }

    /// Returns true if the incoming change was a delete.
    #[must_use]
    pub fn is_update_delete(&self) -> bool {
        self.incoming.is_none()
    }
}

/// Applies a policy to a collision between a change from `origin` and a
/// local write at `receiver`.
#[must_use]
pub fn resolve(policy: ConflictResolution, origin: Address, receiver: Address) -> ConflictOutcome {
    let accept = match policy {
        ConflictResolution::Reject => false,
        ConflictResolution::AcceptIncoming => true,
        ConflictResolution::HighestAddressWins => origin > receiver,
    };
    if accept {
        ConflictOutcome::AcceptedIncoming
    } else {
        ConflictOutcome::KeptLocal
    }
}
