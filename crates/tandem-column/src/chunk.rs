//! Sealed column chunks and their zone maps.

use std::cmp::Ordering;

use bytes::{BufMut, Bytes, BytesMut};

use tandem_common::config::ColumnStoreConfig;
use tandem_common::types::{ColumnType, CompareOp, Value};
use tandem_common::{TandemError, TandemResult};

use crate::encoding::{choose_encoding, decode_values, encode_values, ColumnProfile, Encoding};

/// Min/max/null summary of one chunk, used to skip chunks during scans.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneMap {
    /// Smallest non-null value.
    pub min: Option<Value>,
    /// Largest non-null value.
    pub max: Option<Value>,
    /// Number of NULLs.
    pub null_count: usize,
    /// Number of rows.
    pub row_count: usize,
}

impl ZoneMap {
    /// Summarizes `values`.
    ///
    /// Values that do not compare (NaN) are left out of min/max; no
    /// comparison predicate can select them anyway.
    #[must_use]
    pub fn build(values: &[Value]) -> Self {
        let mut zone = Self {
            row_count: values.len(),
            ..Self::default()
        };
        for value in values {
            if value.is_null() {
                zone.null_count += 1;
                continue;
            }
            if value.compare(value).is_none() {
                continue;
            }
            if zone
                .min
                .as_ref()
                .map_or(true, |min| value.compare(min) == Some(Ordering::Less))
            {
                zone.min = Some(value.clone());
            }
            if zone
                .max
                .as_ref()
                .map_or(true, |max| value.compare(max) == Some(Ordering::Greater))
            {
                zone.max = Some(value.clone());
            }
        }
        zone
    }

    /// Returns false only if no value in the chunk can satisfy `column op value`.
    #[must_use]
    pub fn may_match(&self, op: CompareOp, value: &Value) -> bool {
        if value.is_null() {
            return false;
        }
        let (Some(min), Some(max)) = (&self.min, &self.max) else {
            // Only NULLs (or NaNs): comparisons never hold.
            return false;
        };
        let (Some(lo), Some(hi)) = (min.compare(value), max.compare(value)) else {
            return true;
        };
        match op {
            CompareOp::Eq => lo != Ordering::Greater && hi != Ordering::Less,
            CompareOp::NotEq => !(lo == Ordering::Equal && hi == Ordering::Equal),
            CompareOp::Lt => lo == Ordering::Less,
            CompareOp::LtEq => lo != Ordering::Greater,
            CompareOp::Gt => hi == Ordering::Greater,
            CompareOp::GtEq => hi != Ordering::Less,
        }
    }

    /// Returns true if the chunk may hold a NULL.
    #[must_use]
    pub fn may_have_nulls(&self) -> bool {
        self.null_count > 0
    }

    /// Returns true if the chunk may hold a non-null value.
    #[must_use]
    pub fn may_have_values(&self) -> bool {
        self.null_count < self.row_count
    }
}

/// One column of a chunk group, encoded and checksummed.
#[derive(Debug, Clone)]
pub struct ColumnChunk {
    column_type: ColumnType,
    encoding: Encoding,
    row_count: usize,
    data: Bytes,
    checksum: u32,
    zone: ZoneMap,
    plain_size: usize,
}

impl ColumnChunk {
    /// Encodes `values` with the encoding their profile calls for.
    pub fn encode(
        column_type: ColumnType,
        values: &[Value],
        config: &ColumnStoreConfig,
    ) -> TandemResult<Self> {
        let profile = ColumnProfile::of(column_type, values);
        let encoding = choose_encoding(column_type, &profile, config);
        Self::with_encoding(column_type, encoding, values)
    }

    /// Encodes `values` with a fixed encoding.
    pub fn with_encoding(
        column_type: ColumnType,
        encoding: Encoding,
        values: &[Value],
    ) -> TandemResult<Self> {
        let mut buf = BytesMut::new();
        encode_values(encoding, column_type, values, &mut buf)?;
        let data = buf.freeze();
        Ok(Self {
            column_type,
            encoding,
            row_count: values.len(),
            checksum: crc32fast::hash(&data),
            data,
            zone: ZoneMap::build(values),
            plain_size: values.iter().map(Value::encoded_len).sum(),
        })
    }

    /// Verifies the checksum and decodes the values.
    pub fn decode(&self) -> TandemResult<Vec<Value>> {
        self.verify()?;
        decode_values(self.encoding, self.column_type, self.row_count, &self.data)
    }

    /// Verifies the checksum.
    pub fn verify(&self) -> TandemResult<()> {
        let actual = crc32fast::hash(&self.data);
        if actual != self.checksum {
            return Err(TandemError::corruption(format!(
                "column chunk checksum mismatch: expected {:#010x}, found {:#010x}",
                self.checksum, actual
            )));
        }
        Ok(())
    }

    /// Returns the logical column type.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Returns the encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Returns the zone map.
    #[must_use]
    pub fn zone(&self) -> &ZoneMap {
        &self.zone
    }

    /// Returns the CRC32 of the encoded data.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.data.len()
    }

    /// Returns the size of the same values in plain encoding.
    #[must_use]
    pub fn plain_size(&self) -> usize {
        self.plain_size
    }

    /// Plain size divided by encoded size.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        if self.data.is_empty() {
            1.0
        } else {
            self.plain_size as f64 / self.data.len() as f64
        }
    }

    /// Appends the serialized chunk: type, encoding, rows, checksum, data.
    pub(crate) fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.column_type.tag());
        buf.put_u8(match self.column_type {
            ColumnType::Decimal { scale } => scale,
            _ => 0,
        });
        buf.put_u8(self.encoding as u8);
        buf.put_u32_le(self.row_count as u32);
        buf.put_u32_le(self.checksum);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self) {
        let mut data = self.data.to_vec();
        if let Some(byte) = data.first_mut() {
            *byte ^= 0xff;
        }
        self.data = Bytes::from(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_map_pruning() {
        let values = vec![Value::Int64(10), Value::Null, Value::Int64(30), Value::Int64(20)];
        let zone = ZoneMap::build(&values);
        assert_eq!(zone.min, Some(Value::Int64(10)));
        assert_eq!(zone.max, Some(Value::Int64(30)));
        assert_eq!(zone.null_count, 1);

        assert!(zone.may_match(CompareOp::Eq, &Value::Int64(15)));
        assert!(!zone.may_match(CompareOp::Eq, &Value::Int64(31)));
        assert!(!zone.may_match(CompareOp::Lt, &Value::Int64(10)));
        assert!(zone.may_match(CompareOp::LtEq, &Value::Int64(10)));
        assert!(!zone.may_match(CompareOp::Gt, &Value::Int64(30)));
        assert!(zone.may_match(CompareOp::GtEq, &Value::Int64(30)));
        assert!(!zone.may_match(CompareOp::Eq, &Value::Null));
        // Decimal literal against an integer column still prunes exactly.
        assert!(!zone.may_match(CompareOp::Gt, &Value::decimal(3001, 2)));
        assert!(zone.may_match(CompareOp::Lt, &Value::decimal(1001, 2)));
    }

    #[test]
    fn test_zone_map_all_nulls() {
        let zone = ZoneMap::build(&[Value::Null, Value::Null]);
        assert!(!zone.may_match(CompareOp::NotEq, &Value::Int64(1)));
        assert!(zone.may_have_nulls());
        assert!(!zone.may_have_values());
    }

    #[test]
    fn test_chunk_checksum() {
        let values: Vec<Value> = (0..100).map(|i| Value::Int64(i * 2)).collect();
        let mut chunk =
            ColumnChunk::encode(ColumnType::Int64, &values, &ColumnStoreConfig::default()).unwrap();
        assert_eq!(chunk.encoding(), Encoding::Delta);
        assert!(chunk.compression_ratio() > 4.0);
        assert_eq!(chunk.decode().unwrap(), values);

        chunk.corrupt_for_test();
        assert!(matches!(chunk.decode(), Err(TandemError::Corruption { .. })));
    }

    #[test]
    fn test_identical_input_identical_bytes() {
        let values: Vec<Value> = ["a", "b", "a", "c"].iter().map(|s| Value::from(*s)).collect();
        let config = ColumnStoreConfig::default();
        let a = ColumnChunk::encode(ColumnType::Text, &values, &config).unwrap();
        let b = ColumnChunk::encode(ColumnType::Text, &values, &config).unwrap();
        let (mut x, mut y) = (Vec::new(), Vec::new());
        a.write_to(&mut x);
        b.write_to(&mut y);
        assert_eq!(x, y);
    }
}
