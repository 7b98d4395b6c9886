//! Change entries.
//!
//! Payload layout (little endian), following the frame header:
//!
//! ```text
//! table_id u64 | row_id u64 | txn_id u64 | commit_ts u64 | kind u8 | images u8
//! [before row] [after row]
//! ```
//!
//! `images` has bit 0 set when a before image follows and bit 1 set when an
//! after image follows.

use bytes::{Buf, BufMut};

use tandem_common::types::{
    decode_row, encode_row, encoded_row_len, Row, RowId, SeqNo, TableId, Timestamp, TxnId,
};
use tandem_common::{TandemError, TandemResult};

const HAS_BEFORE: u8 = 0b01;
const HAS_AFTER: u8 = 0b10;

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChangeKind {
    /// First version of a row.
    Insert = 1,
    /// Replacement of an existing row.
    Update = 2,
    /// Removal of a row. Carries no after image.
    Delete = 3,
}

impl ChangeKind {
    /// Decodes a kind byte.
    pub fn from_u8(value: u8) -> TandemResult<Self> {
        match value {
            1 => Ok(Self::Insert),
            2 => Ok(Self::Update),
            3 => Ok(Self::Delete),
            other => Err(TandemError::corruption(format!(
                "unknown change kind {}",
                other
            ))),
        }
    }
}

/// A mutation waiting for its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDraft {
    /// Mutated table.
    pub table_id: TableId,
    /// Mutated row.
    pub row_id: RowId,
    /// Issuing transaction.
    pub txn_id: TxnId,
    /// Mutation kind.
    pub kind: ChangeKind,
    /// Row image before the mutation.
    pub before: Option<Row>,
    /// Row image after the mutation.
    pub after: Option<Row>,
}

impl ChangeDraft {
    /// Creates an insert or update draft depending on whether a prior image exists.
    #[must_use]
    pub fn upsert(
        table_id: TableId,
        row_id: RowId,
        txn_id: TxnId,
        before: Option<Row>,
        after: Row,
    ) -> Self {
        let kind = if before.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        Self {
            table_id,
            row_id,
            txn_id,
            kind,
            before,
            after: Some(after),
        }
    }

    /// Creates a delete draft.
    #[must_use]
    pub fn delete(table_id: TableId, row_id: RowId, txn_id: TxnId, before: Row) -> Self {
        Self {
            table_id,
            row_id,
            txn_id,
            kind: ChangeKind::Delete,
            before: Some(before),
            after: None,
        }
    }

    /// Stamps the draft with its sequence number and commit time.
    #[must_use]
    pub fn into_entry(self, seq: SeqNo, commit_ts: Timestamp) -> ChangeEntry {
        ChangeEntry {
            seq,
            table_id: self.table_id,
            row_id: self.row_id,
            txn_id: self.txn_id,
            kind: self.kind,
            before: self.before,
            after: self.after,
            commit_ts,
        }
    }
}

/// A committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntry {
    /// Position in the log.
    pub seq: SeqNo,
    /// Mutated table.
    pub table_id: TableId,
    /// Mutated row.
    pub row_id: RowId,
    /// Issuing transaction.
    pub txn_id: TxnId,
    /// Mutation kind.
    pub kind: ChangeKind,
    /// Row image before the mutation.
    pub before: Option<Row>,
    /// Row image after the mutation. `None` for deletes.
    pub after: Option<Row>,
    /// Commit wall-clock time.
    pub commit_ts: Timestamp,
}

impl ChangeEntry {
    /// Returns true if this entry removes the row.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        34 + self.before.as_deref().map_or(0, encoded_row_len)
            + self.after.as_deref().map_or(0, encoded_row_len)
    }

    /// Encodes the payload (everything but the sequence number).
    pub fn encode_payload(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.table_id.as_u64());
        buf.put_u64_le(self.row_id.as_u64());
        buf.put_u64_le(self.txn_id.as_u64());
        buf.put_u64_le(self.commit_ts.as_micros());
        buf.put_u8(self.kind as u8);
        let mut images = 0;
        if self.before.is_some() {
            images |= HAS_BEFORE;
        }
        if self.after.is_some() {
            images |= HAS_AFTER;
        }
        buf.put_u8(images);
        if let Some(before) = &self.before {
            encode_row(before, buf);
        }
        if let Some(after) = &self.after {
            encode_row(after, buf);
        }
    }

    /// Decodes a payload written by [`ChangeEntry::encode_payload`].
    pub fn decode_payload(seq: SeqNo, buf: &mut impl Buf) -> TandemResult<Self> {
        if buf.remaining() < 34 {
            return Err(TandemError::corruption(format!(
                "change entry {} payload truncated",
                seq
            )));
        }
        let table_id = TableId::new(buf.get_u64_le());
        let row_id = RowId::new(buf.get_u64_le());
        let txn_id = TxnId::new(buf.get_u64_le());
        let commit_ts = Timestamp::from_micros(buf.get_u64_le());
        let kind = ChangeKind::from_u8(buf.get_u8())?;
        let images = buf.get_u8();
        let before = if images & HAS_BEFORE != 0 {
            Some(decode_row(buf)?)
        } else {
            None
        };
        let after = if images & HAS_AFTER != 0 {
            Some(decode_row(buf)?)
        } else {
            None
        };
        if kind == ChangeKind::Delete && after.is_some() {
            return Err(TandemError::corruption(format!(
                "delete entry {} carries an after image",
                seq
            )));
        }
        Ok(Self {
            seq,
            table_id,
            row_id,
            txn_id,
            kind,
            before,
            after,
            commit_ts,
        })
    }
}
