//! Backup and failover orchestration over one primary and one secondary.
//!
//! ```text
//! Bootstrap -> SteadyReplication -> PrimaryLost -> Recovering -> SteadyReplication
//!     \                                                \
//!      `-> Aborted                                      `-> Aborted
//! ```
//!
//! The secondary is created from a whole-file copy of the primary and pulls
//! from it on a fixed interval. When the primary is lost, a new primary is
//! materialized from the secondary and the secondary pulls from that one.

use crate::config::OrchestratorConfig;
use crate::driver::{spawn_replication_loop, LoopSummary, ReplicationHandle};
use crate::error::{ReplError, ReplResult};
use crate::exchange::{ExchangeEngine, ExchangeResult};
use crate::identity::Identity;
use crate::peers::PeerRegistry;
use crate::session::EnvironmentConnector;
use mirrordb_core::{
    Address, BackupInfo, BackupOptions, Config, CoreError, Database, EncryptionKey, Environment,
    ExchangeCheckpoint, Locator, OpenMode, PeerDefinition, PeerRecord, ReplicationMode,
    SequenceNumber, TxnMode,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};

/// Phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No secondary yet.
    Bootstrap,
    /// The secondary follows the primary.
    SteadyReplication,
    /// The primary is gone; replication is stopped.
    PrimaryLost,
    /// A new primary is being materialized.
    Recovering,
    /// A phase failed; operator intervention is required.
    Aborted,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bootstrap => "bootstrap",
            Self::SteadyReplication => "steady-replication",
            Self::PrimaryLost => "primary-lost",
            Self::Recovering => "recovering",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of [`FailoverOrchestrator::bootstrap_secondary`].
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    /// Address of the primary.
    pub primary_address: Address,
    /// Address given to the secondary.
    pub secondary_address: Address,
    /// The whole-file copy.
    pub backup: BackupInfo,
    /// Replicated tables.
    pub tables: Vec<String>,
}

/// Result of [`FailoverOrchestrator::promote_secondary`].
#[derive(Debug, Clone)]
pub struct PromotionReport {
    /// Address of the new primary.
    pub address: Address,
    /// The whole-file copy.
    pub backup: BackupInfo,
    /// The definition of the lost primary, if the secondary still had one.
    pub dropped_peer: Option<PeerDefinition>,
    /// Sequence the new primary continues after. Covers everything the
    /// secondary had pulled from the lost primary under the same address.
    pub resumed_after: SequenceNumber,
    /// Replicated tables.
    pub tables: Vec<String>,
}

/// Drives bootstrap, steady replication and failover.
///
/// Holds the replication loop while in `SteadyReplication`. Dropping the
/// orchestrator stops the loop.
#[derive(Debug)]
pub struct FailoverOrchestrator {
    env: Environment,
    config: OrchestratorConfig,
    state: OrchestratorState,
    primary: Option<Locator>,
    secondary: Option<Locator>,
    engine: Option<Arc<ExchangeEngine>>,
    replication: Option<ReplicationHandle>,
}

impl FailoverOrchestrator {
    /// Creates an orchestrator in `Bootstrap`.
    #[must_use]
    pub fn new(env: Environment, config: OrchestratorConfig) -> Self {
        Self {
            env,
            config,
            state: OrchestratorState::Bootstrap,
            primary: None,
            secondary: None,
            engine: None,
            replication: None,
        }
    }

    /// Creates an orchestrator for an existing secondary whose primary is
    /// already known to be lost, e.g. in a fresh process.
    #[must_use]
    pub fn after_primary_loss(
        env: Environment,
        config: OrchestratorConfig,
        secondary: Locator,
    ) -> Self {
        let mut orchestrator = Self::new(env, config);
        orchestrator.state = OrchestratorState::PrimaryLost;
        orchestrator.secondary = Some(secondary);
        orchestrator
    }

    /// The current phase.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// The current primary.
    #[must_use]
    pub fn primary(&self) -> Option<&Locator> {
        self.primary.as_ref()
    }

    /// The current secondary.
    #[must_use]
    pub fn secondary(&self) -> Option<&Locator> {
        self.secondary.as_ref()
    }

    /// The engine replicating into the secondary.
    #[must_use]
    pub fn engine(&self) -> Option<&Arc<ExchangeEngine>> {
        self.engine.as_ref()
    }

    /// Returns true while the replication loop runs.
    #[must_use]
    pub fn is_replicating(&self) -> bool {
        self.replication.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn expect_state(&self, expected: OrchestratorState, to: OrchestratorState) -> ReplResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ReplError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn transition(&mut self, to: OrchestratorState) {
        info!(from = %self.state, %to, "orchestrator state change");
        self.state = to;
    }

    fn open(&self, locator: &Locator, key: Option<EncryptionKey>) -> ReplResult<Arc<Database>> {
        let config = Config::new()
            .open_mode(OpenMode::OpenExisting)
            .with_optional_key(key);
        Ok(self.env.open(locator, config)?)
    }

    fn engine_for(&self, secondary: Arc<Database>) -> Arc<ExchangeEngine> {
        let connector =
            EnvironmentConnector::new(self.env.clone()).with_key(self.config.primary_key.clone());
        Arc::new(ExchangeEngine::new(secondary, Arc::new(connector)))
    }

    fn replicated_table_names(&self, db: &Database) -> Vec<String> {
        match &self.config.tables {
            Some(tables) => tables.clone(),
            None => db.table_names(),
        }
    }

    /// Creates `secondary` as a copy of `primary` that follows it.
    ///
    /// The primary gets `primary_address` if it has no address yet, and
    /// every replicated table is set to publish. The secondary is a fresh
    /// whole-file copy with its own address, the tables set to accept
    /// changes, and the primary registered as an ad-hoc peer whose
    /// checkpoint starts at the copied sequence.
    ///
    /// On failure a partially created secondary is removed and the
    /// orchestrator moves to `Aborted`.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` outside `Bootstrap`; otherwise the error of
    /// the failed step.
    pub fn bootstrap_secondary(
        &mut self,
        primary: &Locator,
        secondary: &Locator,
    ) -> ReplResult<BootstrapReport> {
        self.expect_state(OrchestratorState::Bootstrap, OrchestratorState::SteadyReplication)?;
        let span = info_span!("bootstrap", %primary, %secondary);
        let _enter = span.enter();

        let mut created = false;
        match self.try_bootstrap(primary, secondary, &mut created) {
            Ok((report, db)) => {
                self.engine = Some(self.engine_for(db));
                self.primary = Some(primary.clone());
                self.secondary = Some(secondary.clone());
                self.transition(OrchestratorState::SteadyReplication);
                info!(
                    sequence = %report.backup.sequence,
                    rows = report.backup.rows,
                    "secondary bootstrapped"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "bootstrap failed");
                if created {
                    if let Err(cleanup) = self.env.remove(secondary) {
                        warn!(error = %cleanup, "could not remove partial secondary");
                    }
                }
                self.transition(OrchestratorState::Aborted);
                Err(e)
            }
        }
    }

    fn try_bootstrap(
        &self,
        primary: &Locator,
        secondary: &Locator,
        created: &mut bool,
    ) -> ReplResult<(BootstrapReport, Arc<Database>)> {
        let source = self.open(primary, self.config.primary_key.clone())?;
        let identity = Identity::new(&source);
        let primary_address = match identity.address() {
            Some(address) => address,
            None => identity.configure_identity(self.config.primary_address)?,
        };
        let tables = self.replicated_table_names(&source);
        for table in &tables {
            let info = identity.table_info(table)?;
            identity.set_table_mode(table, info.mode.with_out(), info.resolution)?;
        }

        if self.env.exists(secondary) {
            return Err(CoreError::DatabaseExists {
                locator: secondary.to_string(),
            }
            .into());
        }
        let options = BackupOptions::new()
            .source_key(self.config.primary_key.clone())
            .destination_key(self.config.secondary_key.clone())
            .reset_replication(true);
        let backup = self.env.backup(primary, secondary, &options)?;
        *created = true;

        let db = self.open(secondary, self.config.secondary_key.clone())?;
        let identity = Identity::new(&db);
        let secondary_address = identity.configure_identity(self.config.secondary_address)?;
        for table in &tables {
            identity.set_table_mode(table, ReplicationMode::In, self.config.resolution)?;
        }
        PeerRegistry::new(&db).create_peer_at(
            &self.config.peer_name,
            PeerDefinition::ad_hoc(primary_address, primary.clone()),
            ExchangeCheckpoint {
                pushed: SequenceNumber::ZERO,
                pulled: backup.sequence,
            },
        )?;

        Ok((
            BootstrapReport {
                primary_address,
                secondary_address,
                backup,
                tables,
            },
            db,
        ))
    }

    /// Starts the periodic replication loop. Does nothing if it runs.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` outside `SteadyReplication`, or `Io` if the
    /// thread cannot be spawned.
    pub fn start_replication(&mut self) -> ReplResult<()> {
        self.expect_state(
            OrchestratorState::SteadyReplication,
            OrchestratorState::SteadyReplication,
        )?;
        if self.is_replicating() {
            return Ok(());
        }
        // A finished loop still holds its result; surface it in the log.
        if let Some(finished) = self.replication.take() {
            if let Err(e) = finished.shutdown() {
                warn!(error = %e, "previous replication loop had failed");
            }
        }
        let engine = self.ready_engine()?;
        let handle = spawn_replication_loop(
            engine,
            self.config.peer_name.clone(),
            self.config.replication.clone(),
        )?;
        self.replication = Some(handle);
        Ok(())
    }

    /// Stops the replication loop and waits for the running round.
    ///
    /// # Errors
    ///
    /// The fatal error that ended the loop, if any.
    pub fn stop_replication(&mut self) -> ReplResult<Option<LoopSummary>> {
        match self.replication.take() {
            Some(handle) => handle.shutdown().map(Some),
            None => Ok(None),
        }
    }

    /// Runs one exchange round now, outside the loop.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` outside `SteadyReplication`, or the error
    /// of the round.
    pub fn exchange_now(&self) -> ReplResult<ExchangeResult> {
        self.expect_state(
            OrchestratorState::SteadyReplication,
            OrchestratorState::SteadyReplication,
        )?;
        self.ready_engine()?.exchange(&self.config.peer_name)
    }

    /// Trims the primary's change log of everything the secondary has
    /// pulled. Returns the new floor of each replicated table.
    ///
    /// The secondary is the primary's only subscriber here, so its
    /// checkpoints bound what can still be asked for. Safe to call while
    /// the replication loop runs: checkpoints only move forward.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` outside `SteadyReplication`, `UnknownPeer`
    /// if the secondary lost its peer, or a storage error.
    pub fn compact_primary_log(&self) -> ReplResult<BTreeMap<String, SequenceNumber>> {
        self.expect_state(
            OrchestratorState::SteadyReplication,
            OrchestratorState::SteadyReplication,
        )?;
        let (Some(primary_at), Some(secondary_at)) = (&self.primary, &self.secondary) else {
            return Err(ReplError::InvalidStateTransition {
                from: self.state.to_string(),
                to: OrchestratorState::SteadyReplication.to_string(),
            });
        };
        let secondary = self.open(secondary_at, self.config.secondary_key.clone())?;
        let record = PeerRegistry::new(&secondary).peer(&self.config.peer_name)?;
        let primary = self.open(primary_at, self.config.primary_key.clone())?;

        let mut txn = primary.begin(TxnMode::Exclusive)?;
        let mut floors = BTreeMap::new();
        for table in self.replicated_table_names(&primary) {
            let through = record.checkpoint(&table).pulled;
            txn.trim_change_log(&table, through)?;
            floors.insert(table, through);
        }
        txn.commit()?;
        info!(locator = %primary_at, tables = floors.len(), "primary change log compacted");
        Ok(floors)
    }

    fn ready_engine(&self) -> ReplResult<Arc<ExchangeEngine>> {
        self.engine.clone().ok_or_else(|| ReplError::InvalidStateTransition {
            from: self.state.to_string(),
            to: OrchestratorState::SteadyReplication.to_string(),
        })
    }

    /// Records that the primary is gone. Stops the replication loop first.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` outside `SteadyReplication`.
    pub fn declare_primary_lost(&mut self) -> ReplResult<()> {
        self.expect_state(
            OrchestratorState::SteadyReplication,
            OrchestratorState::PrimaryLost,
        )?;
        match self.stop_replication() {
            Ok(Some(summary)) => info!(rounds = summary.rounds, "replication stopped"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "replication loop had already failed"),
        }
        self.engine = None;
        self.transition(OrchestratorState::PrimaryLost);
        Ok(())
    }

    /// Turns a copy of `secondary` into the new primary at `new_primary`.
    ///
    /// The secondary's peer for the lost primary is dropped first. The new
    /// primary is a whole-file copy of the secondary that reuses the lost
    /// primary's address and publishes the replicated tables. Its sequence
    /// counter is raised past everything the secondary had pulled from the
    /// lost primary, so no number is issued twice under that address. The
    /// secondary then follows the new primary from that point.
    ///
    /// On failure a partially created new primary is removed, the
    /// secondary is left standalone without a peer, and the orchestrator
    /// moves to `Aborted`.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` outside `PrimaryLost`; otherwise the error
    /// of the failed step.
    pub fn promote_secondary(
        &mut self,
        secondary: &Locator,
        new_primary: &Locator,
    ) -> ReplResult<PromotionReport> {
        self.expect_state(OrchestratorState::PrimaryLost, OrchestratorState::Recovering)?;
        self.transition(OrchestratorState::Recovering);
        let span = info_span!("promote", %secondary, %new_primary);
        let _enter = span.enter();

        let mut created = false;
        match self.try_promote(secondary, new_primary, &mut created) {
            Ok((report, db)) => {
                self.engine = Some(self.engine_for(db));
                self.primary = Some(new_primary.clone());
                self.secondary = Some(secondary.clone());
                self.transition(OrchestratorState::SteadyReplication);
                info!(address = %report.address, "secondary promoted");
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "promotion failed");
                if created {
                    if let Err(cleanup) = self.env.remove(new_primary) {
                        warn!(error = %cleanup, "could not remove partial primary");
                    }
                }
                self.transition(OrchestratorState::Aborted);
                Err(e)
            }
        }
    }

    fn try_promote(
        &self,
        secondary: &Locator,
        new_primary: &Locator,
        created: &mut bool,
    ) -> ReplResult<(PromotionReport, Arc<Database>)> {
        let db = self.open(secondary, self.config.secondary_key.clone())?;
        let registry = PeerRegistry::new(&db);
        let lost = match registry.drop_peer(&self.config.peer_name) {
            Ok(record) => Some(record),
            Err(ReplError::UnknownPeer { name }) => {
                warn!(peer = %name, "secondary has no peer for the lost primary");
                None
            }
            Err(e) => return Err(e),
        };
        let tables = self.replicated_table_names(&db);

        if self.env.exists(new_primary) {
            return Err(CoreError::DatabaseExists {
                locator: new_primary.to_string(),
            }
            .into());
        }
        let options = BackupOptions::new()
            .source_key(self.config.secondary_key.clone())
            .destination_key(self.config.primary_key.clone())
            .reset_replication(true);
        let backup = self.env.backup(secondary, new_primary, &options)?;
        *created = true;

        let promoted = self.open(new_primary, self.config.primary_key.clone())?;
        let high_water = lost
            .as_ref()
            .map_or(SequenceNumber::ZERO, PeerRecord::pulled_high_water);
        let mut txn = promoted.begin(TxnMode::Exclusive)?;
        txn.raise_sequence(high_water);
        let resumed_after = txn.commit()?.last_sequence;
        let reused = match &lost {
            Some(record) => record.definition.remote_address.get(),
            None => self.config.primary_address,
        };
        let identity = Identity::new(&promoted);
        let address = identity.configure_identity(reused)?;
        for table in &tables {
            identity.set_table_mode(table, ReplicationMode::Out, self.config.resolution)?;
        }

        registry.create_peer_at(
            &self.config.peer_name,
            PeerDefinition::ad_hoc(address, new_primary.clone()),
            ExchangeCheckpoint {
                pushed: SequenceNumber::ZERO,
                pulled: resumed_after,
            },
        )?;

        Ok((
            PromotionReport {
                address,
                backup,
                dropped_peer: lost.map(|r| r.definition),
                resumed_after,
                tables,
            },
            db,
        ))
    }
}

impl Drop for FailoverOrchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.replication.take() {
            if let Err(e) = handle.shutdown() {
                warn!(error = %e, "replication loop had failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(OrchestratorState::SteadyReplication.to_string(), "steady-replication");
        assert_eq!(OrchestratorState::Aborted.to_string(), "aborted");
    }

    #[test]
    fn promote_requires_primary_lost() {
        let mut orchestrator =
            FailoverOrchestrator::new(Environment::new(), OrchestratorConfig::default());
        let err = orchestrator
            .promote_secondary(&Locator::memory("s"), &Locator::memory("p2"))
            .unwrap_err();
        assert!(matches!(err, ReplError::InvalidStateTransition { .. }));
        assert_eq!(orchestrator.state(), OrchestratorState::Bootstrap);
    }

    #[test]
    fn exchange_requires_steady_state() {
        let orchestrator =
            FailoverOrchestrator::new(Environment::new(), OrchestratorConfig::default());
        assert!(orchestrator.exchange_now().is_err());
        assert!(orchestrator.compact_primary_log().is_err());
    }

    #[test]
    fn missing_primary_aborts() {
        let mut orchestrator =
            FailoverOrchestrator::new(Environment::new(), OrchestratorConfig::default());
        let err = orchestrator
            .bootstrap_secondary(&Locator::memory("none"), &Locator::memory("s"))
            .unwrap_err();
        assert!(matches!(err, ReplError::Storage(_)));
        assert_eq!(orchestrator.state(), OrchestratorState::Aborted);
    }
}
