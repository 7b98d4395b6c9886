//! Chunk groups.
//!
//! A chunk group holds one sealed batch of a table: the row keys and
//! sequence numbers of the rows it carries, one [`ColumnChunk`] per schema
//! column, and the keys the batch deleted. Building a group is a pure
//! function of its inputs, so [`ChunkGroup::to_bytes`] of a re-derived
//! group is identical to the original.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use tandem_common::config::ColumnStoreConfig;
use tandem_common::types::{ChunkId, Row, RowId, SeqNo, TableSchema, Value};
use tandem_common::{TandemError, TandemResult};

use crate::chunk::{ColumnChunk, ZoneMap};

/// Magic number of a serialized chunk group ("TCGR").
const GROUP_MAGIC: u32 = 0x5443_4752;

/// One row going into a chunk group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// Row key.
    pub row_id: RowId,
    /// Sequence number of the change that produced this image.
    pub seq: SeqNo,
    /// Row image.
    pub values: Arc<Row>,
}

/// A sealed, immutable batch of column chunks.
#[derive(Debug, Clone)]
pub struct ChunkGroup {
    id: ChunkId,
    last_seq: SeqNo,
    row_ids: Vec<RowId>,
    seqs: Vec<SeqNo>,
    columns: Vec<ColumnChunk>,
    deleted: Vec<RowId>,
}

impl ChunkGroup {
    /// Encodes `rows` into a group covering sequence numbers `id.first_seq..=last_seq`.
    ///
    /// `deleted` lists keys whose last change in the batch was a delete.
    pub fn build(
        id: ChunkId,
        schema: &TableSchema,
        last_seq: SeqNo,
        rows: &[GroupRow],
        mut deleted: Vec<RowId>,
        config: &ColumnStoreConfig,
    ) -> TandemResult<Self> {
        if last_seq < id.first_seq {
            return Err(TandemError::internal(format!(
                "chunk group {} ends at {} before it starts",
                id, last_seq
            )));
        }
        if let Some(row) = rows.iter().find(|r| r.values.len() != schema.arity()) {
            return Err(TandemError::encoding(format!(
                "row {} has {} values, table '{}' has {} columns",
                row.row_id,
                row.values.len(),
                schema.name,
                schema.arity()
            )));
        }

        let columns = schema
            .columns
            .iter()
            .enumerate()
            .map(|(position, column)| {
                let values: Vec<Value> = rows.iter().map(|r| r.values[position].clone()).collect();
                ColumnChunk::encode(column.column_type, &values, config)
            })
            .collect::<TandemResult<Vec<_>>>()?;

        deleted.sort_unstable();
        deleted.dedup();
        Ok(Self {
            id,
            last_seq,
            row_ids: rows.iter().map(|r| r.row_id).collect(),
            seqs: rows.iter().map(|r| r.seq).collect(),
            columns,
            deleted,
        })
    }

    /// Returns the group id.
    #[must_use]
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Returns the first sequence number covered.
    #[must_use]
    pub fn first_seq(&self) -> SeqNo {
        self.id.first_seq
    }

    /// Returns the last sequence number covered.
    #[must_use]
    pub fn last_seq(&self) -> SeqNo {
        self.last_seq
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_ids.len()
    }

    /// Returns the row keys in storage order.
    #[must_use]
    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    /// Returns the sequence numbers in storage order.
    #[must_use]
    pub fn seqs(&self) -> &[SeqNo] {
        &self.seqs
    }

    /// Returns the keys deleted by this batch.
    #[must_use]
    pub fn deleted_keys(&self) -> &[RowId] {
        &self.deleted
    }

    /// Returns the chunk of column `position`.
    #[must_use]
    pub fn column(&self, position: usize) -> Option<&ColumnChunk> {
        self.columns.get(position)
    }

    /// Returns all column chunks.
    #[must_use]
    pub fn columns(&self) -> &[ColumnChunk] {
        &self.columns
    }

    /// Zone map of the `_row_id` pseudo column.
    #[must_use]
    pub fn row_id_zone(&self) -> ZoneMap {
        pseudo_zone(self.row_ids.iter().map(|id| id.as_u64()))
    }

    /// Zone map of the `_seq` pseudo column.
    #[must_use]
    pub fn seq_zone(&self) -> ZoneMap {
        pseudo_zone(self.seqs.iter().map(|s| s.as_u64()))
    }

    /// Decodes one column.
    pub fn decode_column(&self, position: usize) -> TandemResult<Vec<Value>> {
        self.column(position)
            .ok_or_else(|| TandemError::internal(format!("column {} not in group {}", position, self.id)))?
            .decode()
    }

    /// Decodes every row, in storage order.
    pub fn decode_rows(&self) -> TandemResult<Vec<Row>> {
        let mut rows: Vec<Row> = (0..self.row_count())
            .map(|_| Vec::with_capacity(self.columns.len()))
            .collect();
        for chunk in &self.columns {
            for (row, value) in rows.iter_mut().zip(chunk.decode()?) {
                row.push(value);
            }
        }
        Ok(rows)
    }

    /// Encoded bytes across all column chunks.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.columns.iter().map(ColumnChunk::encoded_size).sum()
    }

    /// Serializes the group.
    ///
    /// ```text
    /// | magic | table | first_seq | generation | last_seq | rows |
    /// | row_id * rows | seq * rows | columns (u16) | chunk * columns |
    /// | deleted (u32) | row_id * deleted | crc32 |
    /// ```
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.row_count() * 16 + self.encoded_size());
        buf.put_u32_le(GROUP_MAGIC);
        buf.put_u64_le(self.id.table_id.as_u64());
        buf.put_u64_le(self.id.first_seq.as_u64());
        buf.put_u32_le(self.id.generation);
        buf.put_u64_le(self.last_seq.as_u64());
        buf.put_u32_le(self.row_count() as u32);
        self.row_ids.iter().for_each(|id| buf.put_u64_le(id.as_u64()));
        self.seqs.iter().for_each(|seq| buf.put_u64_le(seq.as_u64()));
        buf.put_u16_le(self.columns.len() as u16);
        self.columns.iter().for_each(|chunk| chunk.write_to(&mut buf));
        buf.put_u32_le(self.deleted.len() as u32);
        self.deleted.iter().for_each(|id| buf.put_u64_le(id.as_u64()));
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.freeze()
    }
}

fn pseudo_zone(values: impl Iterator<Item = u64>) -> ZoneMap {
    let mut zone = ZoneMap::default();
    for v in values {
        let v = Value::unsigned(v);
        zone.row_count += 1;
        if zone.min.as_ref().map_or(true, |m| v < *m) {
            zone.min = Some(v.clone());
        }
        if zone.max.as_ref().map_or(true, |m| v > *m) {
            zone.max = Some(v);
        }
    }
    zone
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::types::{ColumnDef, ColumnType, TableId};

    fn schema() -> TableSchema {
        TableSchema::new(
            TableId::new(1),
            "accounts",
            vec![
                ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
                ColumnDef::new("kind", ColumnType::Text),
            ],
        )
        .unwrap()
    }

    fn rows(n: u64) -> Vec<GroupRow> {
        (0..n)
            .map(|i| GroupRow {
                row_id: RowId::new(100 + i),
                seq: SeqNo::new(10 + i),
                values: Arc::new(vec![
                    Value::decimal(i128::from(i) * 100, 2),
                    Value::from(if i % 2 == 0 { "DEPOSIT" } else { "WITHDRAWAL" }),
                ]),
            })
            .collect()
    }

    fn build(rows: &[GroupRow]) -> ChunkGroup {
        ChunkGroup::build(
            ChunkId::new(TableId::new(1), SeqNo::new(10)),
            &schema(),
            SeqNo::new(30),
            rows,
            vec![RowId::new(7), RowId::new(3), RowId::new(7)],
            &ColumnStoreConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_build_and_decode() {
        let input = rows(16);
        let group = build(&input);
        assert_eq!(group.row_count(), 16);
        assert_eq!(group.deleted_keys(), &[RowId::new(3), RowId::new(7)]);
        assert_eq!(group.first_seq(), SeqNo::new(10));
        assert_eq!(group.last_seq(), SeqNo::new(30));

        let decoded = group.decode_rows().unwrap();
        for (row, original) in decoded.iter().zip(&input) {
            assert_eq!(row, original.values.as_ref());
        }
        assert_eq!(group.row_id_zone().max, Some(Value::unsigned(115)));
        assert_eq!(group.seq_zone().min, Some(Value::unsigned(10)));
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let input = rows(40);
        assert_eq!(build(&input).to_bytes(), build(&input).to_bytes());
    }

    #[test]
    fn test_arity_mismatch() {
        let mut input = rows(2);
        input[1].values = Arc::new(vec![Value::Null]);
        let err = ChunkGroup::build(
            ChunkId::new(TableId::new(1), SeqNo::new(1)),
            &schema(),
            SeqNo::new(2),
            &input,
            Vec::new(),
            &ColumnStoreConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TandemError::EncodingFailure { .. }));
    }
}
