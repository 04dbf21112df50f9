//! Database handle.

use crate::catalog::ReplicationCatalog;
use crate::change_log::ChangeRecord;
use crate::config::{Config, OpenMode};
use crate::error::{CoreError, CoreResult};
use crate::image::Image;
use crate::locator::Locator;
use crate::transaction::{Transaction, TxnMode};
use crate::types::{Address, RowKey, SequenceNumber};
use crate::value::{TableDef, Value};
use mirrordb_storage::{EncryptedBackend, FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use tracing::{debug, info};

/// Consistent copy of one table together with the sequence number it
/// corresponds to.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    /// Table definition.
    pub def: TableDef,
    /// All rows in key order.
    pub rows: Vec<Vec<Value>>,
    /// Highest committed sequence number at the time of the snapshot.
    pub sequence: SequenceNumber,
}

/// An open database.
///
/// The committed state lives in memory and is written through to the
/// storage backend on every commit. Usually obtained from
/// [`Environment::open`](crate::Environment::open), which shares one handle
/// per locator.
pub struct Database {
    locator: Locator,
    pub(crate) state: RwLock<Image>,
    pub(crate) write_lock: Mutex<()>,
    backend: Mutex<Option<Box<dyn StorageBackend>>>,
    leases: Mutex<HashSet<String>>,
}

impl Database {
    /// Opens a database directly, without an environment.
    ///
    /// `memory:` databases opened this way are private to the handle.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` for `OpenExisting` on a missing database,
    /// a storage error if the image cannot be read or decrypted, or
    /// `InvalidFormat` if it is not a database image.
    pub fn open(locator: &Locator, config: &Config) -> CoreResult<Self> {
        let mut backend = build_backend(locator, config)?;
        let image = match (backend.load()?, config.open_mode) {
            (Some(_), OpenMode::CreateAlways) | (None, OpenMode::CreateAlways | OpenMode::OpenOrCreate) => {
                let image = Image::default();
                backend.store(&image.encode()?)?;
                info!(locator = %locator, "created database");
                image
            }
            (Some(bytes), _) => {
                let image = Image::decode(&bytes)?;
                info!(
                    locator = %locator,
                    tables = image.tables.len(),
                    last_sequence = %image.last_sequence,
                    "opened database"
                );
                image
            }
            (None, OpenMode::OpenExisting) => {
                return Err(CoreError::DatabaseNotFound {
                    locator: locator.to_string(),
                });
            }
        };
        Ok(Self::with_backend(locator.clone(), backend, image))
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial image cannot be stored.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(&Locator::memory("private"), &Config::default())
    }

    /// Creates a database at `locator` holding `image`, replacing whatever
    /// was stored there.
    pub(crate) fn create_from_image(
        locator: &Locator,
        config: &Config,
        image: Image,
    ) -> CoreResult<Self> {
        let mut backend = build_backend(locator, config)?;
        backend.store(&image.encode()?)?;
        Ok(Self::with_backend(locator.clone(), backend, image))
    }

    fn with_backend(locator: Locator, backend: Box<dyn StorageBackend>, image: Image) -> Self {
        Self {
            locator,
            state: RwLock::new(image),
            write_lock: Mutex::new(()),
            backend: Mutex::new(Some(backend)),
            leases: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the locator this database was opened from.
    #[must_use]
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Begins a transaction.
    ///
    /// An exclusive transaction blocks until no other exclusive transaction
    /// or commit is in progress.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` if the database was closed.
    pub fn begin(&self, mode: TxnMode) -> CoreResult<Transaction<'_>> {
        self.ensure_open()?;
        let guard = match mode {
            TxnMode::Exclusive => Some(self.write_lock.lock()),
            TxnMode::Shared => None,
        };
        Ok(Transaction::new(self, mode, guard))
    }

    /// Runs `f` in a transaction and commits it if `f` succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` (after rolling back) or from the commit.
    pub fn transaction<T, F>(&self, mode: TxnMode, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let mut txn = self.begin(mode)?;
        let result = f(&mut txn)?;
        txn.commit()?;
        Ok(result)
    }

    /// Reads a committed row.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn get(&self, table: &str, key: RowKey) -> CoreResult<Option<Vec<Value>>> {
        let state = self.state.read();
        let data = state
            .tables
            .get(table)
            .ok_or_else(|| CoreError::table_not_found(table))?;
        Ok(data.rows.get(&key).map(|r| r.values.clone()))
    }

    /// Returns all committed rows of a table in key order.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn scan(&self, table: &str) -> CoreResult<Vec<(RowKey, Vec<Value>)>> {
        let state = self.state.read();
        let data = state
            .tables
            .get(table)
            .ok_or_else(|| CoreError::table_not_found(table))?;
        Ok(data
            .rows
            .iter()
            .map(|(k, r)| (*k, r.values.clone()))
            .collect())
    }

    /// Names of all tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.state.read().tables.keys().cloned().collect()
    }

    /// Definition of a table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn table_def(&self, table: &str) -> CoreResult<TableDef> {
        self.state
            .read()
            .tables
            .get(table)
            .map(|t| t.def.clone())
            .ok_or_else(|| CoreError::table_not_found(table))
    }

    /// Copies a whole table and the current sequence number atomically.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn table_snapshot(&self, table: &str) -> CoreResult<TableSnapshot> {
        let state = self.state.read();
        let data = state
            .tables
            .get(table)
            .ok_or_else(|| CoreError::table_not_found(table))?;
        Ok(TableSnapshot {
            def: data.def.clone(),
            rows: data.rows.values().map(|r| r.values.clone()).collect(),
            sequence: state.last_sequence,
        })
    }

    /// Highest committed sequence number.
    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        self.state.read().last_sequence
    }

    /// Configured replication address.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        self.state.read().catalog.address()
    }

    /// Copy of the committed replication catalog.
    #[must_use]
    pub fn catalog(&self) -> ReplicationCatalog {
        self.state.read().catalog.clone()
    }

    /// Committed change records of `table` from `origin` after `after`.
    #[must_use]
    pub fn changes_since(
        &self,
        table: &str,
        origin: Address,
        after: SequenceNumber,
    ) -> Vec<ChangeRecord> {
        self.state
            .read()
            .change_log
            .since(table, origin, after)
            .cloned()
            .collect()
    }

    /// Sequence through which `table`'s change log has been trimmed.
    #[must_use]
    pub fn log_floor(&self, table: &str) -> SequenceNumber {
        self.state.read().log_floor(table)
    }

    /// Total number of rows across all tables.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.state.read().row_count()
    }

    /// Size of the stored image in bytes.
    #[must_use]
    pub fn size_on_disk(&self) -> u64 {
        self.backend.lock().as_ref().map_or(0, |b| b.size())
    }

    /// Marks a peer as in use until the returned lease is dropped.
    ///
    /// # Errors
    ///
    /// Returns `PeerLeased` if the peer is already leased.
    pub fn lease_peer(&self, name: &str) -> CoreResult<PeerLease<'_>> {
        if !self.leases.lock().insert(name.to_string()) {
            return Err(CoreError::PeerLeased {
                name: name.to_string(),
            });
        }
        Ok(PeerLease {
            db: self,
            name: name.to_string(),
        })
    }

    /// Returns true if the database has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.backend.lock().is_none()
    }

    /// Closes the database. Later transactions fail with `DatabaseClosed`.
    pub fn close(&self) {
        if self.backend.lock().take().is_some() {
            info!(locator = %self.locator, "closed database");
        }
    }

    /// Consistent copy of the committed image.
    pub(crate) fn capture(&self) -> Image {
        self.state.read().clone()
    }

    /// Closes the database and deletes its stored image.
    pub(crate) fn destroy(&self) -> CoreResult<()> {
        if let Some(mut backend) = self.backend.lock().take() {
            backend.destroy()?;
            info!(locator = %self.locator, "removed database");
        }
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::DatabaseClosed);
        }
        Ok(())
    }

    pub(crate) fn persist(&self, bytes: &[u8]) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        let backend = backend.as_mut().ok_or(CoreError::DatabaseClosed)?;
        backend.store(bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("locator", &self.locator)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Marks a peer as busy for as long as it is alive.
#[derive(Debug)]
pub struct PeerLease<'a> {
    db: &'a Database,
    name: String,
}

impl PeerLease<'_> {
    /// Name of the leased peer.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PeerLease<'_> {
    fn drop(&mut self) {
        self.db.leases.lock().remove(&self.name);
    }
}

fn build_backend(locator: &Locator, config: &Config) -> CoreResult<Box<dyn StorageBackend>> {
    let base: Box<dyn StorageBackend> = match locator {
        Locator::File(path) => {
            Box::new(FileBackend::open(path)?.with_sync(config.sync_on_commit))
        }
        Locator::Memory(_) => Box::new(InMemoryBackend::new()),
    };
    match &config.encryption_key {
        Some(key) => {
            debug!(locator = %locator, "encryption at rest enabled");
            Ok(Box::new(EncryptedBackend::new(base, key.clone())?))
        }
        None => Ok(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnType;
    use tempfile::tempdir;

    fn demo_table() -> TableDef {
        TableDef::new("t1")
            .column("id", ColumnType::Integer)
            .column("data", ColumnType::Text)
    }

    fn row(id: i64, data: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::text(data)]
    }

    fn memory_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.transaction(TxnMode::Exclusive, |txn| txn.create_table(demo_table()))
            .unwrap();
        db
    }

    #[test]
    fn insert_and_read() {
        let db = memory_db();
        db.transaction(TxnMode::Exclusive, |txn| {
            txn.insert("t1", row(1, "one"))?;
            txn.insert("t1", row(2, "two"))
        })
        .unwrap();
        assert_eq!(db.get("t1", 1).unwrap(), Some(row(1, "one")));
        assert_eq!(db.scan("t1").unwrap().len(), 2);
    }

    #[test]
    fn duplicate_insert_fails() {
        let db = memory_db();
        db.transaction(TxnMode::Exclusive, |txn| txn.insert("t1", row(1, "a")))
            .unwrap();
        let err = db
            .transaction(TxnMode::Exclusive, |txn| txn.insert("t1", row(1, "b")))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { key: 1, .. }));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let db = memory_db();
        {
            let mut txn = db.begin(TxnMode::Shared).unwrap();
            txn.put("t1", row(5, "five")).unwrap();
            assert_eq!(txn.get("t1", 5).unwrap(), Some(row(5, "five")));
        }
        assert_eq!(db.get("t1", 5).unwrap(), None);
    }

    #[test]
    fn failed_closure_rolls_back() {
        let db = memory_db();
        let result: CoreResult<()> = db.transaction(TxnMode::Exclusive, |txn| {
            txn.put("t1", row(1, "x"))?;
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert!(db.scan("t1").unwrap().is_empty());
    }

    #[test]
    fn shared_transactions_detect_conflicts() {
        let db = memory_db();
        db.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(1, "base")))
            .unwrap();

        let mut first = db.begin(TxnMode::Shared).unwrap();
        let mut second = db.begin(TxnMode::Shared).unwrap();
        assert!(first.get("t1", 1).unwrap().is_some());
        assert!(second.get("t1", 1).unwrap().is_some());
        first.put("t1", row(1, "first")).unwrap();
        second.put("t1", row(1, "second")).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, CoreError::TransactionConflict { key: Some(1), .. }));
        assert_eq!(db.get("t1", 1).unwrap(), Some(row(1, "first")));
    }

    #[test]
    fn blind_shared_writes_do_not_conflict() {
        let db = memory_db();
        let mut a = db.begin(TxnMode::Shared).unwrap();
        let mut b = db.begin(TxnMode::Shared).unwrap();
        a.put("t1", row(1, "a")).unwrap();
        b.put("t1", row(2, "b")).unwrap();
        a.commit().unwrap();
        b.commit().unwrap();
        assert_eq!(db.scan("t1").unwrap().len(), 2);
    }

    #[test]
    fn truncate_then_write() {
        let db = memory_db();
        db.transaction(TxnMode::Exclusive, |txn| {
            txn.put("t1", row(1, "a"))?;
            txn.put("t1", row(2, "b"))
        })
        .unwrap();
        let removed = db
            .transaction(TxnMode::Exclusive, |txn| {
                let removed = txn.truncate("t1")?;
                txn.put("t1", row(9, "z"))?;
                Ok(removed)
            })
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.scan("t1").unwrap(), vec![(9, row(9, "z"))]);
    }

    #[test]
    fn unknown_table() {
        let db = memory_db();
        assert!(matches!(
            db.scan("nope"),
            Err(CoreError::TableNotFound { .. })
        ));
        let err = db
            .transaction(TxnMode::Shared, |txn| txn.put("nope", row(1, "x")))
            .unwrap_err();
        assert!(matches!(err, CoreError::TableNotFound { .. }));
    }

    #[test]
    fn peer_leases_are_exclusive() {
        let db = memory_db();
        let lease = db.lease_peer("main").unwrap();
        assert_eq!(lease.name(), "main");
        assert!(matches!(
            db.lease_peer("main"),
            Err(CoreError::PeerLeased { .. })
        ));
        drop(lease);
        assert!(db.lease_peer("main").is_ok());
    }

    #[test]
    fn closed_database_rejects_transactions() {
        let db = memory_db();
        db.close();
        assert!(db.is_closed());
        assert!(matches!(
            db.begin(TxnMode::Shared),
            Err(CoreError::DatabaseClosed)
        ));
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempdir().unwrap();
        let locator = Locator::file(dir.path().join("main.mdb"));
        {
            let db = Database::open(&locator, &Config::default()).unwrap();
            db.transaction(TxnMode::Exclusive, |txn| {
                txn.create_table(demo_table())?;
                txn.put("t1", row(1, "persisted"))
            })
            .unwrap();
        }
        let db = Database::open(
            &locator,
            &Config::new().open_mode(OpenMode::OpenExisting),
        )
        .unwrap();
        assert_eq!(db.get("t1", 1).unwrap(), Some(row(1, "persisted")));
    }

    #[test]
    fn open_existing_missing_file() {
        let dir = tempdir().unwrap();
        let locator = Locator::file(dir.path().join("missing.mdb"));
        let err = Database::open(&locator, &Config::new().open_mode(OpenMode::OpenExisting))
            .unwrap_err();
        assert!(matches!(err, CoreError::DatabaseNotFound { .. }));
    }

    #[test]
    fn table_snapshot_carries_sequence() {
        let db = memory_db();
        db.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(3, "c")))
            .unwrap();
        let snap = db.table_snapshot("t1").unwrap();
        assert_eq!(snap.rows, vec![row(3, "c")]);
        assert_eq!(snap.sequence, db.last_sequence());
        assert_eq!(snap.def, demo_table());
    }
}
