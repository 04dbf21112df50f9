//! # mirrordb core
//!
//! The embedded table store that mirrordb replicates.
//!
//! This crate provides:
//! - [`Environment`]: an explicit registry of open databases keyed by [`Locator`]
//! - [`Database`]: tables of rows keyed by an integer primary key
//! - [`Transaction`]: exclusive and shared transactions with atomic commit
//! - A committed change log for tables that publish changes
//! - Persistent replication catalog records (address, table modes, peers)
//! - Whole-file backup with optional re-keying and replication reset
//!
//! ## Example
//!
//! ```rust
//! use mirrordb_core::{ColumnType, Config, Environment, Locator, TableDef, TxnMode, Value};
//!
//! let env = Environment::new();
//! let locator: Locator = "memory:demo".parse().unwrap();
//! let db = env.open(&locator, Config::default()).unwrap();
//!
//! db.transaction(TxnMode::Exclusive, |txn| {
//!     txn.create_table(TableDef::new("t1")
//!         .column("id", ColumnType::Integer)
//!         .column("data", ColumnType::Text))?;
//!     txn.insert("t1", vec![Value::Integer(1), Value::text("one")])
//! }).unwrap();
//!
//! assert_eq!(db.scan("t1").unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod change_log;
mod config;
mod database;
mod env;
mod error;
mod image;
mod locator;
mod transaction;
mod types;
mod value;

pub use catalog::{
    ConflictResolution, ExchangeCheckpoint, PeerDefinition, PeerKind, PeerRecord,
    ReplicationCatalog, ReplicationMode, TableReplicationInfo,
};
pub use change_log::ChangeRecord;
pub use config::{Config, OpenMode};
pub use database::{Database, PeerLease, TableSnapshot};
pub use env::{BackupInfo, BackupOptions, Environment};
pub use error::{CoreError, CoreResult};
pub use locator::Locator;
pub use transaction::{CommitInfo, Row, Transaction, TxnMode};
pub use types::{Address, RowKey, SequenceNumber};
pub use value::{ColumnDef, ColumnType, TableDef, Value};

pub use mirrordb_storage::EncryptionKey;
