//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a row. The first column of every table.
pub type RowKey = i64;

/// Replication address of a database instance.
///
/// A small positive integer, unique among databases that exchange changes
/// with each other. Zero is never a valid address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u32);

impl Address {
    /// Creates an address, or `None` for zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Returns the raw address value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Sequence number of a change-log record.
///
/// Sequence numbers are assigned per database, increase with every logged
/// change and are never reused. Zero means "nothing yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The sequence number before any change.
    pub const ZERO: Self = Self(0);

    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_rejects_zero() {
        assert!(Address::new(0).is_none());
        assert_eq!(Address::new(3).map(Address::get), Some(3));
    }

    #[test]
    fn address_ordering() {
        let low = Address::new(1).unwrap();
        let high = Address::new(2).unwrap();
        assert!(high > low);
        assert_eq!(high.to_string(), "@2");
    }

    #[test]
    fn sequence_next() {
        let seq = SequenceNumber::ZERO;
        assert_eq!(seq.next(), SequenceNumber::new(1));
        assert_eq!(seq.next().to_string(), "seq:1");
    }
}
