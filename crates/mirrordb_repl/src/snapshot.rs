//! Snapshot bootstrap and schema mirroring.

use crate::error::{ReplError, ReplResult};
use crate::exchange::{ExchangeEngine, ExchangeResult};
use crate::session::PeerSession;
use mirrordb_core::{ConflictResolution, CoreError, TableReplicationInfo, TxnMode};
use tracing::{info, info_span};

/// Result of [`ExchangeEngine::initialize_mirror`].
#[derive(Debug, Clone)]
pub struct MirrorSummary {
    /// Tables mirrored from the peer.
    pub tables: Vec<String>,
    /// The exchange round run after mirroring the schema.
    pub exchange: ExchangeResult,
    /// Rows copied by the snapshots.
    pub rows: usize,
}

impl ExchangeEngine {
    /// Replaces the local content of `table` with the peer's current rows.
    ///
    /// The copy bypasses the change log. Afterwards the pulled checkpoint
    /// of the table equals the peer's sequence number at the time of the
    /// copy, so the next exchange only transfers later changes. Runs in
    /// its own exclusive transaction.
    ///
    /// # Errors
    ///
    /// - `TableNotSubscribed` if the local table does not accept changes
    /// - `UnknownTable` if the peer has no such table
    /// - `SchemaMismatch` if the definitions differ
    /// - the session errors of [`exchange`](Self::exchange)
    pub fn snapshot_in(&self, peer: &str, table: &str) -> ReplResult<usize> {
        let span = info_span!("snapshot", peer, table);
        let _enter = span.enter();

        let session = PeerSession::open(&self.local, self.connector.as_ref(), peer)?;
        let mut txn = self.local.begin(TxnMode::Exclusive)?;
        if !txn.catalog().table_info(table).mode.subscribes() {
            return Err(ReplError::TableNotSubscribed {
                table: table.to_string(),
            });
        }

        let snapshot = session.remote().table_snapshot(table).map_err(|e| match e {
            CoreError::TableNotFound { name } => ReplError::UnknownTable { table: name },
            other => ReplError::Storage(other),
        })?;
        if txn.table_def(table)?.columns != snapshot.def.columns {
            return Err(ReplError::SchemaMismatch {
                table: table.to_string(),
            });
        }

        let replaced = txn.truncate(table)?;
        let rows = snapshot.rows.len();
        for values in snapshot.rows {
            txn.put_replicated(table, values, session.remote_address())?;
        }
        txn.catalog_mut()
            .reset_pulled(session.name(), table, snapshot.sequence);
        txn.commit()?;

        self.stats.write().snapshots += 1;
        info!(rows, replaced, through = %snapshot.sequence, "snapshot complete");
        Ok(rows)
    }

    /// Creates locally every table the peer publishes and makes it accept
    /// changes with `resolution`. Returns the mirrored table names.
    ///
    /// Existing tables are kept if their definition matches.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if an existing table differs from the
    /// peer's, or the session errors of [`exchange`](Self::exchange).
    pub fn mirror_schema(
        &self,
        peer: &str,
        resolution: ConflictResolution,
    ) -> ReplResult<Vec<String>> {
        let session = PeerSession::open(&self.local, self.connector.as_ref(), peer)?;
        let remote = session.remote();
        let remote_catalog = remote.catalog();

        let mut txn = self.local.begin(TxnMode::Exclusive)?;
        let mut mirrored = Vec::new();
        for (table, info) in remote_catalog.replicated_tables() {
            if !info.mode.publishes() {
                continue;
            }
            let def = remote.table_def(table)?;
            if txn.has_table(table) {
                if txn.table_def(table)?.columns != def.columns {
                    return Err(ReplError::SchemaMismatch {
                        table: table.to_string(),
                    });
                }
            } else {
                txn.create_table(def)?;
            }
            let mode = txn.catalog().table_info(table).mode.with_in();
            txn.catalog_mut()
                .set_table_info(table, TableReplicationInfo { mode, resolution });
            mirrored.push(table.to_string());
        }
        txn.commit()?;
        info!(peer, tables = ?mirrored, "schema mirrored");
        Ok(mirrored)
    }

    /// Turns this database into a mirror of `peer`: mirrors its schema,
    /// runs one exchange and snapshots every mirrored table.
    ///
    /// # Errors
    ///
    /// Any error of the three steps. Steps already committed stay committed.
    pub fn initialize_mirror(
        &self,
        peer: &str,
        resolution: ConflictResolution,
    ) -> ReplResult<MirrorSummary> {
        let tables = self.mirror_schema(peer, resolution)?;
        let exchange = self.exchange(peer)?;
        let mut rows = 0;
        for table in &tables {
            rows += self.snapshot_in(peer, table)?;
        }
        Ok(MirrorSummary {
            tables,
            exchange,
            rows,
        })
    }
}
