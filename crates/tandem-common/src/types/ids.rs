//! Core identifier types for TandemDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates an identifier from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(id: u64) -> Self {
                Self::new(id)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Table identifier.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tandem_common::types::TableId;
    ///
    /// let table = TableId::new(7);
    /// assert_eq!(table.as_u64(), 7);
    /// ```
    TableId,
    "TableId"
);

define_id!(
    /// Row key within a table.
    ///
    /// Row ids are chosen by the ingestion front end (an account number, an
    /// order id) and identify the logical row across both storage layouts.
    RowId,
    "RowId"
);

define_id!(
    /// Transaction identifier supplied by the transaction-processing front end.
    TxnId,
    "TxnId"
);

define_id!(
    /// Change log sequence number.
    ///
    /// Sequence numbers are assigned by the change log commit path. They are
    /// strictly increasing and gap-free; `SeqNo::ZERO` means "nothing yet".
    ///
    /// # Example
    ///
    /// ```rust
    /// use tandem_common::types::SeqNo;
    ///
    /// let seq = SeqNo::new(41);
    /// assert_eq!(seq.next(), SeqNo::new(42));
    /// assert!(SeqNo::ZERO < seq);
    /// ```
    SeqNo,
    "SeqNo"
);

impl TxnId {
    /// Transaction id used for entries produced by the engine itself.
    pub const SYSTEM: Self = Self(0);
}

impl SeqNo {
    /// The sequence number before the first entry.
    pub const ZERO: Self = Self(0);

    /// The first sequence number a fresh log assigns by default.
    pub const FIRST: Self = Self(1);

    /// Largest representable sequence number.
    pub const MAX: Self = Self(u64::MAX);

    /// Returns the next sequence number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous sequence number, saturating at zero.
    #[inline]
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Returns how many sequence numbers `self` is ahead of `other`.
    #[inline]
    #[must_use]
    pub const fn distance_from(self, other: Self) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

/// Identifier of a sealed chunk group in the columnar store.
///
/// A chunk group is identified by its table, the first sequence number it
/// covers and a compaction generation. Deriving the id from the batch
/// contents keeps re-encoding a batch deterministic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    /// Owning table.
    pub table_id: TableId,
    /// First sequence number covered by the group.
    pub first_seq: SeqNo,
    /// Compaction generation (0 for groups built by the synchronizer).
    pub generation: u32,
}

impl ChunkId {
    /// Creates a chunk id for a freshly synchronized batch.
    #[must_use]
    pub const fn new(table_id: TableId, first_seq: SeqNo) -> Self {
        Self {
            table_id,
            first_seq,
            generation: 0,
        }
    }

    /// Returns the id of a group produced by compacting groups up to this one.
    #[must_use]
    pub const fn compacted(self, generation: u32) -> Self {
        Self {
            table_id: self.table_id,
            first_seq: self.first_seq,
            generation,
        }
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChunkId({}:{}:g{})",
            self.table_id, self.first_seq, self.generation
        )
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:g{}", self.table_id, self.first_seq, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_arithmetic() {
        let seq = SeqNo::new(10);
        assert_eq!(seq.next(), SeqNo::new(11));
        assert_eq!(seq.prev(), SeqNo::new(9));
        assert_eq!(SeqNo::ZERO.prev(), SeqNo::ZERO);
        assert_eq!(SeqNo::MAX.next(), SeqNo::MAX);
        assert_eq!(SeqNo::new(15).distance_from(seq), 5);
        assert_eq!(seq.distance_from(SeqNo::new(15)), 0);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{:?}", TableId::new(3)), "TableId(3)");
        assert_eq!(format!("{}", RowId::new(12345)), "12345");
        let chunk = ChunkId::new(TableId::new(1), SeqNo::new(100));
        assert_eq!(chunk.to_string(), "1:100:g0");
        assert_eq!(chunk.compacted(2).generation, 2);
    }

    #[test]
    fn test_chunk_id_ordering() {
        let a = ChunkId::new(TableId::new(1), SeqNo::new(10));
        let b = ChunkId::new(TableId::new(1), SeqNo::new(20));
        let c = a.compacted(1);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }
}
