//! # mirrordb replication
//!
//! Eventual-consistency replication between mirrordb databases.
//!
//! This crate provides:
//! - Replication identity: a database's address and per-table modes
//! - A peer registry with per-table exchange checkpoints
//! - The exchange engine: one synchronous push/pull round with a peer
//! - Snapshot bootstrap and schema mirroring
//! - A periodic replication loop with cooperative cancellation
//! - A backup/failover orchestrator for one primary and one secondary
//!
//! ## Model
//!
//! Every database has an [`Address`](mirrordb_core::Address). Commits to
//! tables in `Out` mode append change records tagged with that address and
//! a strictly increasing sequence number. An exchange round pushes the
//! records the peer has not seen into its `In` tables and pulls the peer's
//! records back. Each side commits atomically and the checkpoints advance
//! in the same commit as the applied changes.
//!
//! ## Key Invariants
//!
//! - Records from one origin are applied in sequence order, without gaps
//! - Checkpoints never move backwards
//! - Replicated writes are never logged again, so changes do not echo
//! - A failed round leaves both checkpoints where they were
//!
//! ## Example
//!
//! ```rust
//! use mirrordb_core::{
//!     ColumnType, Config, ConflictResolution, Environment, Locator, PeerDefinition,
//!     ReplicationMode, TableDef, TxnMode, Value,
//! };
//! use mirrordb_repl::{ExchangeEngine, Identity, PeerRegistry};
//!
//! let env = Environment::new();
//! let table = TableDef::new("t1")
//!     .column("id", ColumnType::Integer)
//!     .column("data", ColumnType::Text);
//!
//! let primary_at = Locator::memory("primary");
//! let primary = env.open(&primary_at, Config::default()).unwrap();
//! let secondary = env.open(&Locator::memory("secondary"), Config::default()).unwrap();
//! for (db, address, mode) in [(&primary, 1, ReplicationMode::Out), (&secondary, 2, ReplicationMode::In)] {
//!     db.transaction(TxnMode::Exclusive, |txn| txn.create_table(table.clone())).unwrap();
//!     let identity = Identity::new(db);
//!     identity.configure_identity(address).unwrap();
//!     identity.set_table_mode("t1", mode, ConflictResolution::AcceptIncoming).unwrap();
//! }
//!
//! let address = primary.address().unwrap();
//! PeerRegistry::new(&secondary)
//!     .create_peer("main", PeerDefinition::ad_hoc(address, primary_at))
//!     .unwrap();
//!
//! primary
//!     .transaction(TxnMode::Exclusive, |txn| {
//!         txn.insert("t1", vec![Value::Integer(1), Value::text("one")])
//!     })
//!     .unwrap();
//!
//! let engine = ExchangeEngine::with_environment(&env, secondary.clone());
//! let result = engine.exchange("main").unwrap();
//! assert_eq!(result.pulled, 1);
//! assert_eq!(secondary.scan("t1").unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod driver;
mod error;
mod exchange;
mod identity;
mod orchestrator;
mod peers;
mod session;
mod snapshot;

pub use config::{ExchangeConfig, LoopConfig, OrchestratorConfig, RetryConfig};
pub use conflict::{resolve, Conflict, ConflictDirection, ConflictOutcome};
pub use driver::{
    run_replication_loop, spawn_replication_loop, stop_channel, LoopSummary, ReplicationHandle,
    StopHandle, StopSignal,
};
pub use error::{ErrorKind, ReplError, ReplResult};
pub use exchange::{ExchangeEngine, ExchangeResult, ReplicationStats};
pub use identity::Identity;
pub use orchestrator::{BootstrapReport, FailoverOrchestrator, OrchestratorState, PromotionReport};
pub use peers::PeerRegistry;
pub use session::{EnvironmentConnector, PeerConnector};
pub use snapshot::MirrorSummary;
