//! Replication identity: the local address and per-table modes.

use crate::error::{ReplError, ReplResult};
use mirrordb_core::{
    Address, ConflictResolution, Database, ReplicationMode, TableReplicationInfo, TxnMode,
};
use tracing::info;

/// Administrative access to a database's replication identity.
#[derive(Debug, Clone, Copy)]
pub struct Identity<'a> {
    db: &'a Database,
}

impl<'a> Identity<'a> {
    /// Wraps a database.
    #[must_use]
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Returns the configured address.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        self.db.address()
    }

    /// Assigns the local address.
    ///
    /// Setting the same address again is a no-op. A different address is
    /// refused once any table replicates, so change-log origins never mix.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` for zero or an address used by a registered peer
    /// - `AlreadyConfigured` if a different address is set and tables replicate
    pub fn configure_identity(&self, address: u32) -> ReplResult<Address> {
        let address = Address::new(address)
            .ok_or_else(|| ReplError::invalid_address("address must be positive"))?;
        let mut txn = self.db.begin(TxnMode::Exclusive)?;
        let catalog = txn.catalog();
        match catalog.address() {
            Some(current) if current == address => return Ok(address),
            Some(current) if catalog.has_replicated_tables() => {
                return Err(ReplError::AlreadyConfigured {
                    address: current.get(),
                });
            }
            _ => {}
        }
        if let Some(peer) = catalog
            .peers()
            .find(|p| p.definition.remote_address == address)
        {
            return Err(ReplError::invalid_address(format!(
                "{address} belongs to peer {}",
                peer.name
            )));
        }
        txn.catalog_mut().set_address(Some(address));
        txn.commit()?;
        info!(locator = %self.db.locator(), %address, "replication address configured");
        Ok(address)
    }

    /// Sets a table's replication mode and conflict policy. Idempotent.
    ///
    /// Rows already in the table are not logged; only later commits are.
    ///
    /// # Errors
    ///
    /// - `UnknownTable` if the table does not exist
    /// - `ModeOutOfOrder` if a mode other than `None` is set before the address
    pub fn set_table_mode(
        &self,
        table: &str,
        mode: ReplicationMode,
        resolution: ConflictResolution,
    ) -> ReplResult<()> {
        let mut txn = self.db.begin(TxnMode::Exclusive)?;
        if !txn.has_table(table) {
            return Err(ReplError::UnknownTable {
                table: table.to_string(),
            });
        }
        let catalog = txn.catalog();
        if mode != ReplicationMode::None && catalog.address().is_none() {
            return Err(ReplError::ModeOutOfOrder {
                table: table.to_string(),
            });
        }
        let info = TableReplicationInfo { mode, resolution };
        if catalog.table_info(table) == info {
            return Ok(());
        }
        txn.catalog_mut().set_table_info(table, info);
        txn.commit()?;
        info!(locator = %self.db.locator(), table, ?mode, ?resolution, "table mode set");
        Ok(())
    }

    /// Returns a table's replication settings.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTable` if the table does not exist.
    pub fn table_info(&self, table: &str) -> ReplResult<TableReplicationInfo> {
        self.db.table_def(table).map_err(|_| ReplError::UnknownTable {
            table: table.to_string(),
        })?;
        Ok(self.db.catalog().table_info(table))
    }

    /// Names and settings of every replicated table.
    #[must_use]
    pub fn replicated_tables(&self) -> Vec<(String, TableReplicationInfo)> {
        self.db
            .catalog()
            .replicated_tables()
            .map(|(name, info)| (name.to_string(), info))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrordb_core::{ColumnType, TableDef};

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.transaction(TxnMode::Exclusive, |txn| {
            txn.create_table(
                TableDef::new("t1")
                    .column("id", ColumnType::Integer)
                    .column("data", ColumnType::Text),
            )
        })
        .unwrap();
        db
    }

    #[test]
    fn address_must_precede_modes() {
        let db = db();
        let identity = Identity::new(&db);
        let err = identity
            .set_table_mode("t1", ReplicationMode::Out, ConflictResolution::Reject)
            .unwrap_err();
        assert!(matches!(err, ReplError::ModeOutOfOrder { .. }));

        identity.configure_identity(1).unwrap();
        identity
            .set_table_mode("t1", ReplicationMode::Out, ConflictResolution::Reject)
            .unwrap();
        assert_eq!(identity.table_info("t1").unwrap().mode, ReplicationMode::Out);
    }

    #[test]
    fn address_is_fixed_once_tables_replicate() {
        let db = db();
        let identity = Identity::new(&db);
        identity.configure_identity(1).unwrap();
        identity.configure_identity(1).unwrap();
        // No table replicates yet, so the address can still move.
        identity.configure_identity(3).unwrap();
        identity
            .set_table_mode("t1", ReplicationMode::Out, ConflictResolution::Reject)
            .unwrap();
        let err = identity.configure_identity(4).unwrap_err();
        assert!(matches!(err, ReplError::AlreadyConfigured { address: 3 }));
        assert_eq!(identity.address().map(Address::get), Some(3));
    }

    #[test]
    fn zero_address_rejected() {
        let db = db();
        assert!(matches!(
            Identity::new(&db).configure_identity(0),
            Err(ReplError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn unknown_table() {
        let db = db();
        let identity = Identity::new(&db);
        identity.configure_identity(1).unwrap();
        assert!(matches!(
            identity.set_table_mode("nope", ReplicationMode::In, ConflictResolution::Reject),
            Err(ReplError::UnknownTable { .. })
        ));
        assert!(identity.table_info("nope").is_err());
    }

    #[test]
    fn set_table_mode_is_idempotent() {
        let db = db();
        let identity = Identity::new(&db);
        identity.configure_identity(1).unwrap();
        for _ in 0..2 {
            identity
                .set_table_mode("t1", ReplicationMode::Both, ConflictResolution::AcceptIncoming)
                .unwrap();
        }
        assert_eq!(identity.replicated_tables().len(), 1);
        identity
            .set_table_mode("t1", ReplicationMode::None, ConflictResolution::Reject)
            .unwrap();
        assert!(identity.replicated_tables().is_empty());
    }
}
