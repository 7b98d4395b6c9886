//! Per-table change batches.
//!
//! An [`OpenBatch`] collects the change log entries of one table in sequence
//! order and keeps only the last change per row. Sealing freezes it into a
//! [`SealedBatch`], whose rows are ordered by the sequence number of the
//! change that produced them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tandem_column::GroupRow;
use tandem_common::types::{RowId, SeqNo, TableId};
use tandem_common::{TandemError, TandemResult};
use tandem_log::ChangeEntry;

/// A batch still accepting entries.
#[derive(Debug)]
pub struct OpenBatch {
    table_id: TableId,
    first_seq: SeqNo,
    last_seq: SeqNo,
    entries: usize,
    opened_at: Instant,
    latest: BTreeMap<RowId, Arc<ChangeEntry>>,
}

impl OpenBatch {
    /// Starts a batch with its first entry.
    #[must_use]
    pub fn new(entry: Arc<ChangeEntry>) -> Self {
        let mut batch = Self {
            table_id: entry.table_id,
            first_seq: entry.seq,
            last_seq: entry.seq,
            entries: 0,
            opened_at: Instant::now(),
            latest: BTreeMap::new(),
        };
        batch.latest.insert(entry.row_id, entry);
        batch.entries = 1;
        batch
    }

    /// Adds the next entry of this table.
    pub fn push(&mut self, entry: Arc<ChangeEntry>) -> TandemResult<()> {
        if entry.table_id != self.table_id {
            return Err(TandemError::internal(format!(
                "entry {} of table {} pushed into batch of table {}",
                entry.seq, entry.table_id, self.table_id
            )));
        }
        if entry.seq <= self.last_seq {
            return Err(TandemError::internal(format!(
                "entry {} is not after batch end {}",
                entry.seq, self.last_seq
            )));
        }
        self.last_seq = entry.seq;
        self.entries += 1;
        self.latest.insert(entry.row_id, entry);
        Ok(())
    }

    /// Returns the table.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the first buffered sequence number.
    #[must_use]
    pub fn first_seq(&self) -> SeqNo {
        self.first_seq
    }

    /// Returns the last buffered sequence number.
    #[must_use]
    pub fn last_seq(&self) -> SeqNo {
        self.last_seq
    }

    /// Returns the number of entries pushed, including replaced ones.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Returns how long the batch has been open.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Returns true if the batch reached either sealing threshold.
    #[must_use]
    pub fn is_full(&self, max_rows: usize, max_age: Duration) -> bool {
        self.entries >= max_rows || self.age() >= max_age
    }

    /// Freezes the batch.
    #[must_use]
    pub fn seal(self) -> SealedBatch {
        let mut rows = Vec::new();
        let mut deleted = Vec::new();
        let mut winners: Vec<&Arc<ChangeEntry>> = self.latest.values().collect();
        winners.sort_by_key(|e| e.seq);
        for entry in winners {
            match &entry.after {
                Some(after) if !entry.is_delete() => rows.push(GroupRow {
                    row_id: entry.row_id,
                    seq: entry.seq,
                    values: Arc::new(after.clone()),
                }),
                _ => deleted.push(entry.row_id),
            }
        }
        SealedBatch {
            table_id: self.table_id,
            first_seq: self.first_seq,
            last_seq: self.last_seq,
            entries: self.entries,
            rows,
            deleted,
        }
    }
}

/// A batch ready to be encoded and published.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedBatch {
    /// Table the batch belongs to.
    pub table_id: TableId,
    /// First sequence number covered.
    pub first_seq: SeqNo,
    /// Last sequence number covered.
    pub last_seq: SeqNo,
    /// Entries folded into the batch.
    pub entries: usize,
    /// Surviving row images ordered by sequence number.
    pub rows: Vec<GroupRow>,
    /// Rows whose last change was a delete.
    pub deleted: Vec<RowId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::types::{Timestamp, TxnId, Value};
    use tandem_log::ChangeDraft;

    const T: TableId = TableId::new(3);

    fn put(seq: u64, row: u64, amount: i64) -> Arc<ChangeEntry> {
        Arc::new(
            ChangeDraft::upsert(T, RowId::new(row), TxnId::new(seq), None, vec![Value::Int64(amount)])
                .into_entry(SeqNo::new(seq), Timestamp::ZERO),
        )
    }

    fn delete(seq: u64, row: u64) -> Arc<ChangeEntry> {
        Arc::new(
            ChangeDraft::delete(T, RowId::new(row), TxnId::new(seq), vec![Value::Int64(0)])
                .into_entry(SeqNo::new(seq), Timestamp::ZERO),
        )
    }

    #[test]
    fn test_last_change_wins() {
        let mut batch = OpenBatch::new(put(10, 1, 100));
        batch.push(put(11, 2, 200)).unwrap();
        batch.push(put(12, 1, 150)).unwrap();
        batch.push(put(13, 3, 300)).unwrap();
        batch.push(delete(14, 3)).unwrap();
        assert_eq!(batch.entries(), 5);

        let sealed = batch.seal();
        assert_eq!(sealed.first_seq, SeqNo::new(10));
        assert_eq!(sealed.last_seq, SeqNo::new(14));
        assert_eq!(sealed.deleted, vec![RowId::new(3)]);
        let images: Vec<_> = sealed
            .rows
            .iter()
            .map(|r| (r.row_id.as_u64(), r.seq.as_u64(), r.values[0].clone()))
            .collect();
        assert_eq!(
            images,
            vec![(2, 11, Value::Int64(200)), (1, 12, Value::Int64(150))]
        );
    }

    #[test]
    fn test_sealing_thresholds() {
        let mut batch = OpenBatch::new(put(1, 1, 1));
        assert!(!batch.is_full(2, Duration::from_secs(60)));
        batch.push(put(2, 2, 2)).unwrap();
        assert!(batch.is_full(2, Duration::from_secs(60)));
        assert!(OpenBatch::new(put(3, 1, 1)).is_full(100, Duration::ZERO));
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut batch = OpenBatch::new(put(5, 1, 1));
        assert!(batch.push(put(5, 2, 2)).is_err());
    }
}
