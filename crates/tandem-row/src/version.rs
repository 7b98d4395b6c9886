//! Row versions and bounded version chains.
//!
//! A chain stores committed versions newest first. Deletes are stored as
//! tombstone versions so point-in-time reads can tell "deleted" from
//! "not yet inserted".

use std::collections::VecDeque;
use std::sync::Arc;

use tandem_common::types::{Row, SeqNo, Timestamp, TxnId};

/// One committed version of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowVersion {
    /// Commit sequence number.
    pub seq: SeqNo,
    /// Committing transaction.
    pub txn_id: TxnId,
    /// Commit time.
    pub commit_ts: Timestamp,
    /// Row image; `None` marks a delete.
    pub values: Option<Arc<Row>>,
}

impl RowVersion {
    /// Returns true if this version deletes the row.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.values.is_none()
    }
}

/// Committed versions of one row, newest first.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: VecDeque<RowVersion>,
}

impl VersionChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a newer version, dropping the oldest beyond `max_versions`.
    ///
    /// Versions must arrive in increasing sequence order; out-of-order
    /// versions (a replay of something already installed) are ignored.
    pub fn push(&mut self, version: RowVersion, max_versions: usize) -> bool {
        if let Some(newest) = self.versions.front() {
            if version.seq <= newest.seq {
                return false;
            }
        }
        self.versions.push_front(version);
        self.versions.truncate(max_versions.max(1));
        true
    }

    /// Returns the newest version, tombstones included.
    #[must_use]
    pub fn newest(&self) -> Option<&RowVersion> {
        self.versions.front()
    }

    /// Returns the newest live row image.
    #[must_use]
    pub fn latest(&self) -> Option<&RowVersion> {
        self.newest().filter(|v| !v.is_tombstone())
    }

    /// Returns the version visible at `seq`.
    ///
    /// `None` if the row did not exist then, was deleted, or the version was
    /// already dropped from the chain.
    #[must_use]
    pub fn as_of(&self, seq: SeqNo) -> Option<&RowVersion> {
        let version = self.versions.iter().find(|v| v.seq <= seq)?;
        if version.is_tombstone() {
            None
        } else {
            Some(version)
        }
    }

    /// Returns the number of retained versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::types::Value;

    fn version(seq: u64, value: Option<i64>) -> RowVersion {
        RowVersion {
            seq: SeqNo::new(seq),
            txn_id: TxnId::new(seq),
            commit_ts: Timestamp::from_micros(seq),
            values: value.map(|v| Arc::new(vec![Value::Int64(v)])),
        }
    }

    #[test]
    fn test_as_of() {
        let mut chain = VersionChain::new();
        chain.push(version(10, Some(1)), 8);
        chain.push(version(20, None), 8);
        chain.push(version(30, Some(3)), 8);

        assert!(chain.as_of(SeqNo::new(5)).is_none());
        assert_eq!(chain.as_of(SeqNo::new(15)).unwrap().seq, SeqNo::new(10));
        assert!(chain.as_of(SeqNo::new(25)).is_none());
        assert_eq!(chain.as_of(SeqNo::new(99)).unwrap().seq, SeqNo::new(30));
        assert_eq!(chain.latest().unwrap().seq, SeqNo::new(30));
    }

    #[test]
    fn test_bounded_retention() {
        let mut chain = VersionChain::new();
        for seq in 1..=5 {
            chain.push(version(seq, Some(seq as i64)), 3);
        }
        assert_eq!(chain.len(), 3);
        assert!(chain.as_of(SeqNo::new(2)).is_none());
        assert_eq!(chain.as_of(SeqNo::new(3)).unwrap().seq, SeqNo::new(3));
    }

    #[test]
    fn test_stale_versions_ignored() {
        let mut chain = VersionChain::new();
        assert!(chain.push(version(5, Some(5)), 4));
        assert!(!chain.push(version(5, Some(6)), 4));
        assert!(!chain.push(version(4, Some(4)), 4));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_tombstone_hides_latest() {
        let mut chain = VersionChain::new();
        chain.push(version(1, Some(1)), 4);
        chain.push(version(2, None), 4);
        assert!(chain.latest().is_none());
        assert!(chain.newest().unwrap().is_tombstone());
    }
}
