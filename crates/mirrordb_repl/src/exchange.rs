//! The exchange engine: one bidirectional synchronization round.

use crate::config::ExchangeConfig;
use crate::conflict::{self, Conflict, ConflictDirection, ConflictOutcome};
use crate::error::{ReplError, ReplResult};
use crate::session::{EnvironmentConnector, PeerConnector, PeerSession};
use mirrordb_core::{
    Address, ChangeRecord, ConflictResolution, Database, Environment, Row, SequenceNumber,
    Transaction, TxnMode,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span};
use uuid::Uuid;

/// Result of one exchange round.
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    /// Identifier of the round, for log correlation.
    pub round: Uuid,
    /// Change records sent to the peer.
    pub pushed: usize,
    /// Change records received from the peer.
    pub pulled: usize,
    /// Every collision detected, whatever the outcome.
    pub conflicts: Vec<Conflict>,
    /// How long the round took.
    pub duration: Duration,
}

impl ExchangeResult {
    fn new(round: Uuid) -> Self {
        Self {
            round,
            pushed: 0,
            pulled: 0,
            conflicts: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Number of collisions whose incoming change was rejected.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_rejected()).count()
    }

    /// Returns true if nothing was transferred.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pushed == 0 && self.pulled == 0
    }
}

/// Counters accumulated over the life of an engine.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    /// Rounds that committed.
    pub rounds_completed: u64,
    /// Rounds that failed.
    pub rounds_failed: u64,
    /// Records pushed.
    pub rows_pushed: u64,
    /// Records pulled.
    pub rows_pulled: u64,
    /// Collisions detected.
    pub conflicts: u64,
    /// Collisions whose incoming change was rejected.
    pub rejected: u64,
    /// Snapshots taken.
    pub snapshots: u64,
    /// When the last successful round finished.
    pub last_round: Option<Instant>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Drives exchange rounds and snapshots for one local database.
///
/// The engine is cheap to share across threads; every call builds its own
/// [`PeerSession`] and transactions.
pub struct ExchangeEngine {
    pub(crate) local: Arc<Database>,
    pub(crate) connector: Arc<dyn PeerConnector>,
    pub(crate) config: ExchangeConfig,
    pub(crate) stats: RwLock<ReplicationStats>,
}

#[derive(Default, Clone, Copy)]
struct Advance {
    pushed: Option<SequenceNumber>,
    pulled: Option<SequenceNumber>,
}

impl ExchangeEngine {
    /// Creates an engine for `local` that reaches peers through `connector`.
    pub fn new(local: Arc<Database>, connector: Arc<dyn PeerConnector>) -> Self {
        Self {
            local,
            connector,
            config: ExchangeConfig::default(),
            stats: RwLock::new(ReplicationStats::default()),
        }
    }

    /// Creates an engine that reaches peers through `env`.
    pub fn with_environment(env: &Environment, local: Arc<Database>) -> Self {
        Self::new(local, Arc::new(EnvironmentConnector::new(env.clone())))
    }

    /// Replaces the exchange configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    /// The local database.
    #[must_use]
    pub fn local(&self) -> &Arc<Database> {
        &self.local
    }

    /// Snapshot of the accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> ReplicationStats {
        self.stats.read().clone()
    }

    /// Runs one exchange round with `peer`.
    ///
    /// Pushes local changes of tables this side publishes and the peer
    /// accepts, then pulls the peer's changes for tables this side accepts
    /// and the peer publishes. Each side commits once; checkpoints advance
    /// only with a successful commit. With no new commits on either side
    /// the round transfers nothing.
    ///
    /// # Errors
    ///
    /// - `UnknownPeer`, `PeerBusy`, `AddressNotConfigured`, `SchemaMismatch`
    /// - `Transport` if the peer cannot be opened
    /// - `Integrity` if the peer's identity or sequence contradicts the checkpoints
    /// - `Storage` if either commit fails
    pub fn exchange(&self, peer: &str) -> ReplResult<ExchangeResult> {
        let round = Uuid::new_v4();
        let span = info_span!("exchange", %round, peer);
        let _enter = span.enter();

        let started = Instant::now();
        let outcome = self.run_round(peer, round);
        let mut stats = self.stats.write();
        match outcome {
            Ok(mut result) => {
                result.duration = started.elapsed();
                stats.rounds_completed += 1;
                stats.rows_pushed += result.pushed as u64;
                stats.rows_pulled += result.pulled as u64;
                stats.conflicts += result.conflicts.len() as u64;
                stats.rejected += result.rejected() as u64;
                stats.last_round = Some(Instant::now());
                if result.is_idle() {
                    debug!("round idle");
                } else {
                    info!(
                        pushed = result.pushed,
                        pulled = result.pulled,
                        conflicts = result.conflicts.len(),
                        elapsed_ms = result.duration.as_millis() as u64,
                        "round complete"
                    );
                }
                Ok(result)
            }
            Err(e) => {
                stats.rounds_failed += 1;
                stats.last_error = Some(e.to_string());
                debug!(error = %e, "round failed");
                Err(e)
            }
        }
    }

    fn run_round(&self, peer: &str, round: Uuid) -> ReplResult<ExchangeResult> {
        let session = PeerSession::open(&self.local, self.connector.as_ref(), peer)?;
        let local_address = session.local_address();
        let remote_address = session.remote_address();
        let remote = session.remote();

        let mut local_txn = self.local.begin(TxnMode::Shared)?;
        let mut remote_txn = remote.begin(TxnMode::Shared)?;
        let local_catalog = local_txn.catalog();
        let remote_catalog = remote_txn.catalog();
        let remote_sequence = remote_txn.last_sequence();

        let mut result = ExchangeResult::new(round);
        let mut advances: BTreeMap<String, Advance> = BTreeMap::new();

        for (table, info) in local_catalog.replicated_tables() {
            if !info.mode.publishes() {
                continue;
            }
            let remote_info = remote_catalog.table_info(table);
            if !remote_info.mode.subscribes() {
                debug!(table, "peer does not accept table, skipping push");
                continue;
            }
            check_schema(&local_txn, &remote_txn, table)?;
            let checkpoint = session.record().checkpoint(table);
            let floor = local_txn.log_floor(table);
            if checkpoint.pushed < floor {
                return Err(ReplError::integrity(format!(
                    "change log of table {table} is trimmed through {floor} but peer {} \
                     has only received {}; the peer needs a new snapshot",
                    session.name(),
                    checkpoint.pushed,
                )));
            }
            let changes = self.limit(local_txn.changes_since(table, local_address, checkpoint.pushed));
            if changes.is_empty() {
                continue;
            }
            let receiving = Receiving {
                address: remote_address,
                resolution: remote_info.resolution,
                direction: ConflictDirection::Push,
                acknowledged: checkpoint.pulled,
            };
            let high = apply_changes(
                &mut remote_txn,
                table,
                &changes,
                &receiving,
                &mut result.conflicts,
            )?;
            debug!(table, records = changes.len(), through = %high, "pushed");
            result.pushed += changes.len();
            advances.entry(table.to_string()).or_default().pushed = Some(high);
        }

        for (table, info) in local_catalog.replicated_tables() {
            if !info.mode.subscribes() {
                continue;
            }
            let remote_info = remote_catalog.table_info(table);
            if !remote_info.mode.publishes() {
                debug!(table, "peer does not publish table, skipping pull");
                continue;
            }
            check_schema(&local_txn, &remote_txn, table)?;
            let checkpoint = session.record().checkpoint(table);
            if checkpoint.pulled > remote_sequence {
                return Err(ReplError::integrity(format!(
                    "checkpoint {} for table {table} is ahead of peer {} at {remote_sequence}; \
                     the peer was replaced and the table needs a new snapshot",
                    checkpoint.pulled,
                    session.name(),
                )));
            }
            let floor = remote_txn.log_floor(table);
            if checkpoint.pulled < floor {
                return Err(ReplError::integrity(format!(
                    "peer {} trimmed its change log of table {table} through {floor}, \
                     past checkpoint {}; the table needs a new snapshot",
                    session.name(),
                    checkpoint.pulled,
                )));
            }
            let changes =
                self.limit(remote_txn.changes_since(table, remote_address, checkpoint.pulled));
            if changes.is_empty() {
                continue;
            }
            let receiving = Receiving {
                address: local_address,
                resolution: info.resolution,
                direction: ConflictDirection::Pull,
                acknowledged: checkpoint.pushed,
            };
            let high = apply_changes(
                &mut local_txn,
                table,
                &changes,
                &receiving,
                &mut result.conflicts,
            )?;
            debug!(table, records = changes.len(), through = %high, "pulled");
            result.pulled += changes.len();
            advances.entry(table.to_string()).or_default().pulled = Some(high);
        }

        remote_txn.commit()?;

        if !advances.is_empty() {
            let catalog = local_txn.catalog_mut();
            for (table, advance) in &advances {
                let current = session.record().checkpoint(table);
                catalog.advance_checkpoint(
                    session.name(),
                    table,
                    advance.pushed.unwrap_or(current.pushed),
                    advance.pulled.unwrap_or(current.pulled),
                );
            }
        }
        local_txn.commit()?;
        Ok(result)
    }

    fn limit(&self, mut changes: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
        if let Some(limit) = self.config.batch_limit {
            changes.truncate(limit);
        }
        changes
    }
}

impl std::fmt::Debug for ExchangeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeEngine")
            .field("local", self.local.locator())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn check_schema(local: &Transaction<'_>, remote: &Transaction<'_>, table: &str) -> ReplResult<()> {
    let mismatch = || ReplError::SchemaMismatch {
        table: table.to_string(),
    };
    let local_def = local.table_def(table).map_err(|_| mismatch())?;
    let remote_def = remote.table_def(table).map_err(|_| mismatch())?;
    if local_def.columns != remote_def.columns {
        return Err(mismatch());
    }
    Ok(())
}

/// The side a batch of change records is applied to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Receiving {
    pub address: Address,
    pub resolution: ConflictResolution,
    pub direction: ConflictDirection,
    /// Highest sequence of the receiver's own log the sender has already
    /// taken, as of the start of the round.
    pub acknowledged: SequenceNumber,
}

impl Receiving {
    /// True if `row` holds a local write of the receiver that the sender
    /// has not seen yet. Local writes that were never logged are never
    /// seen by the sender.
    fn unacknowledged(&self, row: &Row) -> bool {
        row.origin == Some(self.address)
            && row.sequence.is_none_or(|seq| seq > self.acknowledged)
    }
}

/// Applies change records in order at the receiving side. Returns the
/// highest sequence number handled.
///
/// A record collides when the receiver's row holds a local write the
/// sender has not acknowledged. Rejected records still count as handled.
pub(crate) fn apply_changes(
    txn: &mut Transaction<'_>,
    table: &str,
    changes: &[ChangeRecord],
    receiving: &Receiving,
    conflicts: &mut Vec<Conflict>,
) -> ReplResult<SequenceNumber> {
    let receiver = receiving.address;
    let mut high: Option<SequenceNumber> = None;
    for change in changes {
        if high.is_some_and(|prev| change.sequence <= prev) {
            return Err(ReplError::integrity(format!(
                "change log of {} out of order at {} in table {table}",
                change.origin, change.sequence
            )));
        }
        high = Some(change.sequence);

        let current = txn.get_row(table, change.key)?;
        if let Some(row) = current.filter(|row| receiving.unacknowledged(row)) {
            let outcome = conflict::resolve(receiving.resolution, change.origin, receiver);
            debug!(
                table,
                key = change.key,
                ?outcome,
                direction = ?receiving.direction,
                "conflict"
            );
            conflicts.push(Conflict {
                table: table.to_string(),
                key: change.key,
                origin: change.origin,
                receiver,
                local: row.values,
                incoming: change.after.clone(),
                resolution: receiving.resolution,
                outcome,
                direction: receiving.direction,
            });
            if outcome == ConflictOutcome::KeptLocal {
                continue;
            }
        }

        match &change.after {
            Some(values) => {
                txn.put_replicated(table, values.clone(), change.origin)?;
            }
            None => {
                txn.delete_replicated(table, change.key, change.origin)?;
            }
        }
    }
    high.ok_or_else(|| ReplError::integrity("empty change batch"))
}
