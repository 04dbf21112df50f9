//! Transactions.
//!
//! Two modes are supported:
//!
//! - [`TxnMode::Exclusive`] takes the database write lock at `begin` and
//!   holds it until commit or rollback. Nothing can commit in between.
//! - [`TxnMode::Shared`] buffers its writes and takes the write lock only
//!   for the commit itself. Every row it reads is remembered with its
//!   write stamp; if any of them changed before the commit, the commit
//!   fails with [`CoreError::TransactionConflict`].
//!
//! In both modes writes are invisible to other readers until commit, and
//! the commit persists rows, catalog and change-log records in one image
//! write. Dropping an uncommitted transaction rolls it back.

use crate::catalog::ReplicationCatalog;
use crate::change_log::ChangeRecord;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::image::StoredRow;
use crate::types::{Address, RowKey, SequenceNumber};
use crate::value::{TableDef, Value};
use parking_lot::MutexGuard;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Locking mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Holds the write lock for the whole transaction.
    Exclusive,
    /// Optimistic; validated at commit.
    Shared,
}

/// A row as seen by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values, key first.
    pub values: Vec<Value>,
    /// Address of the last writer, if known.
    pub origin: Option<Address>,
    /// Change-log sequence of the last write when it was a committed, logged
    /// local write.
    pub sequence: Option<SequenceNumber>,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    /// Highest sequence number in the database after the commit.
    pub last_sequence: SequenceNumber,
    /// Number of change-log records appended.
    pub logged: usize,
    /// Number of row writes applied.
    pub rows_written: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOrigin {
    Local,
    Replicated(Address),
}

#[derive(Debug)]
struct PendingWrite {
    table: String,
    key: RowKey,
    values: Option<Vec<Value>>,
    origin: WriteOrigin,
}

/// A database transaction.
///
/// Obtained from [`Database::begin`] or used through
/// [`Database::transaction`].
pub struct Transaction<'db> {
    db: &'db Database,
    mode: TxnMode,
    guard: Option<MutexGuard<'db, ()>>,
    writes: Vec<PendingWrite>,
    latest: HashMap<(String, RowKey), usize>,
    truncated: BTreeSet<String>,
    created: BTreeMap<String, TableDef>,
    catalog: Option<ReplicationCatalog>,
    catalog_base: u64,
    reads: HashMap<(String, RowKey), Option<u64>>,
    sequence_floor: Option<SequenceNumber>,
    trims: BTreeMap<String, SequenceNumber>,
    finished: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db Database, mode: TxnMode, guard: Option<MutexGuard<'db, ()>>) -> Self {
        Self {
            db,
            mode,
            guard,
            writes: Vec::new(),
            latest: HashMap::new(),
            truncated: BTreeSet::new(),
            created: BTreeMap::new(),
            catalog: None,
            catalog_base: 0,
            reads: HashMap::new(),
            sequence_floor: None,
            trims: BTreeMap::new(),
            finished: false,
        }
    }

    /// Returns the locking mode.
    #[must_use]
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns the definition of a table visible to this transaction.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn table_def(&self, table: &str) -> CoreResult<TableDef> {
        if let Some(def) = self.created.get(table) {
            return Ok(def.clone());
        }
        self.db
            .state
            .read()
            .tables
            .get(table)
            .map(|t| t.def.clone())
            .ok_or_else(|| CoreError::table_not_found(table))
    }

    /// Returns true if the table exists.
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.created.contains_key(table) || self.db.state.read().tables.contains_key(table)
    }

    /// Returns the names of all visible tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.db.state.read().tables.keys().cloned().collect();
        names.extend(self.created.keys().cloned());
        names.into_iter().collect()
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns `TableExists` if a table with that name exists, or
    /// `SchemaMismatch` if the definition is invalid.
    pub fn create_table(&mut self, def: TableDef) -> CoreResult<()> {
        def.validate()?;
        if self.has_table(&def.name) {
            return Err(CoreError::TableExists { name: def.name });
        }
        debug!(table = %def.name, columns = def.columns.len(), "creating table");
        self.created.insert(def.name.clone(), def);
        Ok(())
    }

    /// Reads a row with its version information.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn get_row(&mut self, table: &str, key: RowKey) -> CoreResult<Option<Row>> {
        if !self.has_table(table) {
            return Err(CoreError::table_not_found(table));
        }
        if let Some(&idx) = self.latest.get(&(table.to_string(), key)) {
            let write = &self.writes[idx];
            let origin = match write.origin {
                WriteOrigin::Local => self.local_address(),
                WriteOrigin::Replicated(addr) => Some(addr),
            };
            return Ok(write.values.clone().map(|values| Row {
                values,
                origin,
                sequence: None,
            }));
        }
        if self.truncated.contains(table) || self.created.contains_key(table) {
            return Ok(None);
        }

        let db = self.db;
        let state = db.state.read();
        let stored = state.tables.get(table).and_then(|t| t.rows.get(&key));
        if self.mode == TxnMode::Shared {
            self.reads
                .entry((table.to_string(), key))
                .or_insert_with(|| stored.map(|r| r.stamp));
        }
        Ok(stored.map(|r| Row {
            values: r.values.clone(),
            origin: r.origin,
            sequence: r.sequence,
        }))
    }

    /// Reads a row's values.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn get(&mut self, table: &str, key: RowKey) -> CoreResult<Option<Vec<Value>>> {
        Ok(self.get_row(table, key)?.map(|row| row.values))
    }

    /// Returns all visible rows of a table in key order.
    ///
    /// Scans are not part of the read set of a shared transaction.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn scan(&self, table: &str) -> CoreResult<Vec<(RowKey, Vec<Value>)>> {
        if !self.has_table(table) {
            return Err(CoreError::table_not_found(table));
        }
        let mut rows: BTreeMap<RowKey, Vec<Value>> =
            if self.truncated.contains(table) || self.created.contains_key(table) {
                BTreeMap::new()
            } else {
                self.db
                    .state
                    .read()
                    .tables
                    .get(table)
                    .map(|t| {
                        t.rows
                            .iter()
                            .map(|(k, r)| (*k, r.values.clone()))
                            .collect()
                    })
                    .unwrap_or_default()
            };
        for write in self.writes.iter().filter(|w| w.table == table) {
            match &write.values {
                Some(values) => {
                    rows.insert(write.key, values.clone());
                }
                None => {
                    rows.remove(&write.key);
                }
            }
        }
        Ok(rows.into_iter().collect())
    }

    /// Inserts or replaces a row. The key is taken from the first value.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or `SchemaMismatch`.
    pub fn put(&mut self, table: &str, values: Vec<Value>) -> CoreResult<RowKey> {
        self.write(table, values, WriteOrigin::Local)
    }

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if a row with the same key exists.
    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> CoreResult<RowKey> {
        let key = self.table_def(table)?.check_row(&values)?;
        if self.get_row(table, key)?.is_some() {
            return Err(CoreError::DuplicateKey {
                table: table.to_string(),
                key,
            });
        }
        self.write(table, values, WriteOrigin::Local)
    }

    /// Deletes a row. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn delete(&mut self, table: &str, key: RowKey) -> CoreResult<bool> {
        self.remove(table, key, WriteOrigin::Local)
    }

    /// Writes a row received from `origin`.
    ///
    /// Replicated writes keep the remote origin and are never added to the
    /// local change log.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or `SchemaMismatch`.
    pub fn put_replicated(
        &mut self,
        table: &str,
        values: Vec<Value>,
        origin: Address,
    ) -> CoreResult<RowKey> {
        self.write(table, values, WriteOrigin::Replicated(origin))
    }

    /// Deletes a row on behalf of `origin`. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn delete_replicated(
        &mut self,
        table: &str,
        key: RowKey,
        origin: Address,
    ) -> CoreResult<bool> {
        self.remove(table, key, WriteOrigin::Replicated(origin))
    }

    /// Removes every row of a table. Returns the number of rows removed.
    ///
    /// Truncation is not recorded in the change log.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn truncate(&mut self, table: &str) -> CoreResult<usize> {
        let removed = self.scan(table)?.len();
        self.writes.retain(|w| w.table != table);
        self.latest = self
            .writes
            .iter()
            .enumerate()
            .map(|(i, w)| ((w.table.clone(), w.key), i))
            .collect();
        if !self.created.contains_key(table) {
            self.truncated.insert(table.to_string());
        }
        trace!(table, removed, "truncated");
        Ok(removed)
    }

    /// Returns the replication catalog as seen by this transaction.
    #[must_use]
    pub fn catalog(&self) -> ReplicationCatalog {
        match &self.catalog {
            Some(catalog) => catalog.clone(),
            None => self.db.state.read().catalog.clone(),
        }
    }

    /// Returns the catalog for modification. Changes commit with the
    /// transaction.
    pub fn catalog_mut(&mut self) -> &mut ReplicationCatalog {
        if self.catalog.is_none() {
            let state = self.db.state.read();
            self.catalog_base = state.catalog_version;
            self.catalog = Some(state.catalog.clone());
        }
        self.catalog.get_or_insert_with(ReplicationCatalog::default)
    }

    /// Committed change records of `table` from `origin` after `after`, in
    /// ascending sequence order.
    #[must_use]
    pub fn changes_since(
        &self,
        table: &str,
        origin: Address,
        after: SequenceNumber,
    ) -> Vec<ChangeRecord> {
        self.db
            .state
            .read()
            .change_log
            .since(table, origin, after)
            .cloned()
            .collect()
    }

    /// Highest committed sequence number.
    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        self.db.state.read().last_sequence
    }

    /// Makes sure the next logged change gets a sequence above `floor`.
    ///
    /// Takes effect at commit. The counter never moves backwards.
    pub fn raise_sequence(&mut self, floor: SequenceNumber) {
        self.sequence_floor = Some(self.sequence_floor.map_or(floor, |f| f.max(floor)));
    }

    /// Drops the committed change records of `table` at or below `through`.
    ///
    /// Takes effect at commit. Peers whose checkpoint for the table is below
    /// the resulting floor can no longer exchange it incrementally.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    pub fn trim_change_log(&mut self, table: &str, through: SequenceNumber) -> CoreResult<()> {
        if !self.has_table(table) {
            return Err(CoreError::table_not_found(table));
        }
        let entry = self.trims.entry(table.to_string()).or_insert(through);
        *entry = (*entry).max(through);
        Ok(())
    }

    /// Committed sequence through which `table`'s change records have been
    /// trimmed. Zero if nothing was trimmed.
    #[must_use]
    pub fn log_floor(&self, table: &str) -> SequenceNumber {
        self.db.state.read().log_floor(table)
    }

    /// Returns true if the transaction has uncommitted changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
            || !self.truncated.is_empty()
            || !self.created.is_empty()
            || self.catalog.is_some()
            || self.sequence_floor.is_some()
            || !self.trims.is_empty()
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionConflict` if a shared transaction's reads are
    /// stale, or a storage error if the image cannot be written. On error
    /// nothing is applied.
    pub fn commit(mut self) -> CoreResult<CommitInfo> {
        self.finished = true;
        let db = self.db;
        let _guard = match self.guard.take() {
            Some(guard) => guard,
            None => db.write_lock.lock(),
        };
        db.ensure_open()?;

        let current = db.state.read();
        if self.mode == TxnMode::Shared {
            for ((table, key), seen) in &self.reads {
                let now = current
                    .tables
                    .get(table)
                    .and_then(|t| t.rows.get(key))
                    .map(|r| r.stamp);
                if now != *seen {
                    debug!(table = %table, key, "shared transaction read stale row");
                    return Err(CoreError::TransactionConflict {
                        table: table.clone(),
                        key: Some(*key),
                    });
                }
            }
            if self.catalog.is_some() && current.catalog_version != self.catalog_base {
                return Err(CoreError::TransactionConflict {
                    table: "<catalog>".to_string(),
                    key: None,
                });
            }
        }

        if !self.is_dirty() {
            return Ok(CommitInfo {
                last_sequence: current.last_sequence,
                logged: 0,
                rows_written: 0,
            });
        }

        let mut next = current.clone();
        drop(current);

        for (name, def) in std::mem::take(&mut self.created) {
            if next.tables.contains_key(&name) {
                return Err(CoreError::TableExists { name });
            }
            next.tables.insert(
                name,
                crate::image::TableData {
                    def,
                    rows: BTreeMap::new(),
                },
            );
        }
        for table in &self.truncated {
            if let Some(data) = next.tables.get_mut(table) {
                data.rows.clear();
            }
        }
        if let Some(catalog) = self.catalog.take() {
            next.catalog = catalog;
            next.catalog_version += 1;
        }
        if let Some(floor) = self.sequence_floor.take() {
            if floor > next.last_sequence {
                debug!(from = %next.last_sequence, to = %floor, "sequence raised");
                next.last_sequence = floor;
            }
        }
        for (table, through) in std::mem::take(&mut self.trims) {
            let through = through.min(next.last_sequence);
            if through <= next.log_floor(&table) {
                continue;
            }
            let removed = next.change_log.trim(&table, through);
            debug!(table = %table, through = %through, removed, "change log trimmed");
            next.log_floors.insert(table, through);
        }

        next.commit_stamp += 1;
        let stamp = next.commit_stamp;
        let address = next.catalog.address();
        let mut logged = 0;
        let writes = std::mem::take(&mut self.writes);
        for write in &writes {
            let origin = match write.origin {
                WriteOrigin::Local => address,
                WriteOrigin::Replicated(addr) => Some(addr),
            };
            let publishes = write.origin == WriteOrigin::Local
                && next.catalog.table_info(&write.table).mode.publishes();
            let sequence = match (publishes, address) {
                (true, Some(origin)) => {
                    next.last_sequence = next.last_sequence.next();
                    next.change_log.append(ChangeRecord {
                        table: write.table.clone(),
                        origin,
                        sequence: next.last_sequence,
                        key: write.key,
                        after: write.values.clone(),
                    });
                    logged += 1;
                    Some(next.last_sequence)
                }
                _ => None,
            };
            let data = next
                .tables
                .get_mut(&write.table)
                .ok_or_else(|| CoreError::table_not_found(&write.table))?;
            match &write.values {
                Some(values) => {
                    data.rows.insert(
                        write.key,
                        StoredRow {
                            values: values.clone(),
                            origin,
                            stamp,
                            sequence,
                        },
                    );
                }
                None => {
                    data.rows.remove(&write.key);
                }
            }
        }

        let bytes = next.encode()?;
        db.persist(&bytes)?;
        let info = CommitInfo {
            last_sequence: next.last_sequence,
            logged,
            rows_written: writes.len(),
        };
        *db.state.write() = next;
        debug!(
            locator = %db.locator(),
            rows = info.rows_written,
            logged,
            last_sequence = %info.last_sequence,
            "committed"
        );
        Ok(info)
    }

    /// Discards all changes.
    pub fn rollback(mut self) {
        self.finished = true;
        trace!(locator = %self.db.locator(), "rolled back");
    }

    fn write(&mut self, table: &str, values: Vec<Value>, origin: WriteOrigin) -> CoreResult<RowKey> {
        let key = self.table_def(table)?.check_row(&values)?;
        self.push(table, key, Some(values), origin);
        Ok(key)
    }

    fn remove(&mut self, table: &str, key: RowKey, origin: WriteOrigin) -> CoreResult<bool> {
        if self.get_row(table, key)?.is_none() {
            return Ok(false);
        }
        self.push(table, key, None, origin);
        Ok(true)
    }

    fn push(&mut self, table: &str, key: RowKey, values: Option<Vec<Value>>, origin: WriteOrigin) {
        self.latest
            .insert((table.to_string(), key), self.writes.len());
        self.writes.push(PendingWrite {
            table: table.to_string(),
            key,
            values,
            origin,
        });
    }

    fn local_address(&self) -> Option<Address> {
        match &self.catalog {
            Some(catalog) => catalog.address(),
            None => self.db.state.read().catalog.address(),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && self.is_dirty() {
            debug!(locator = %self.db.locator(), "uncommitted transaction dropped");
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("locator", self.db.locator())
            .field("mode", &self.mode)
            .field("writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}
