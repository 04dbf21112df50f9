//! The committed change log.

use crate::types::{Address, RowKey, SequenceNumber};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One committed row-level change to a publishing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Table the change belongs to.
    pub table: String,
    /// Address of the database that made the change.
    pub origin: Address,
    /// Position in the origin's log.
    pub sequence: SequenceNumber,
    /// Primary key of the changed row.
    pub key: RowKey,
    /// Row after the change, or `None` for a delete.
    pub after: Option<Vec<Value>>,
}

impl ChangeRecord {
    /// Returns true if this record deletes its row.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.after.is_none()
    }
}

/// Append-only list of change records in ascending sequence order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ChangeLog {
    records: Vec<ChangeRecord>,
}

impl ChangeLog {
    pub(crate) fn append(&mut self, record: ChangeRecord) {
        debug_assert!(self
            .records
            .last()
            .map_or(true, |last| last.sequence < record.sequence));
        self.records.push(record);
    }

    /// Records for `table` from `origin` with a sequence above `after`.
    pub(crate) fn since<'a>(
        &'a self,
        table: &'a str,
        origin: Address,
        after: SequenceNumber,
    ) -> impl Iterator<Item = &'a ChangeRecord> + 'a {
        let start = self.records.partition_point(|r| r.sequence <= after);
        self.records[start..]
            .iter()
            .filter(move |r| r.table == table && r.origin == origin)
    }

    /// Drops the records of `table` with a sequence at or below `through`.
    /// Returns the number of records removed.
    pub(crate) fn trim(&mut self, table: &str, through: SequenceNumber) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.table != table || r.sequence > through);
        before - self.records.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
