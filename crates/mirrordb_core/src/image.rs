//! In-memory database image and its serialized form.
//!
//! The whole database (tables, catalog, change log, counters) is one value
//! that is CBOR-encoded behind a small header and handed to the storage
//! backend on every commit.

use crate::catalog::ReplicationCatalog;
use crate::change_log::ChangeLog;
use crate::error::{CoreError, CoreResult};
use crate::types::{Address, RowKey, SequenceNumber};
use crate::value::{TableDef, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAGIC: &[u8; 4] = b"MRDB";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 6;

/// A stored row with its version information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredRow {
    pub values: Vec<Value>,
    /// Address of the last writer, `None` if written before an address existed.
    pub origin: Option<Address>,
    /// Commit stamp of the last write.
    pub stamp: u64,
    /// Sequence of the change record logged for the last write, if it was a
    /// logged local write.
    #[serde(default)]
    pub sequence: Option<SequenceNumber>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableData {
    pub def: TableDef,
    pub rows: BTreeMap<RowKey, StoredRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Image {
    pub tables: BTreeMap<String, TableData>,
    pub catalog: ReplicationCatalog,
    /// Bumped whenever the catalog changes.
    pub catalog_version: u64,
    pub change_log: ChangeLog,
    /// Highest sequence number handed out. Survives replication resets.
    pub last_sequence: SequenceNumber,
    /// Bumped on every commit that changes anything.
    pub commit_stamp: u64,
    /// Per-table sequence through which the change log has been trimmed.
    #[serde(default)]
    pub log_floors: BTreeMap<String, SequenceNumber>,
}

impl Image {
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::Codec(e.to_string()))?;
        Ok(buf)
    }

    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(CoreError::invalid_format("missing mirrordb header"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version {version}"
            )));
        }
        ciborium::from_reader(&bytes[HEADER_LEN..]).map_err(|e| CoreError::Codec(e.to_string()))
    }

    /// Gives the image a fresh replication identity.
    ///
    /// Clears the address, table modes, peers and change log. The sequence
    /// counter is kept so numbers are never reused.
    pub(crate) fn reset_replication(&mut self) {
        self.catalog = ReplicationCatalog::default();
        self.catalog_version += 1;
        self.change_log.clear();
        self.log_floors.clear();
        for row in self.tables.values_mut().flat_map(|t| t.rows.values_mut()) {
            row.sequence = None;
        }
    }

    pub(crate) fn log_floor(&self, table: &str) -> SequenceNumber {
        self.log_floors
            .get(table)
            .copied()
            .unwrap_or(SequenceNumber::ZERO)
    }

    pub(crate) fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }
}
