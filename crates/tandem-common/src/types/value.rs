//! Typed column values and the row image codec.
//!
//! Row images travel through the change log as a compact tagged binary
//! encoding. The same encoding is used for change-log payloads in memory and
//! on disk, so replaying a durable log yields identical rows.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::Timestamp;
use crate::error::{TandemError, TandemResult};

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit IEEE float.
    Float64,
    /// Fixed-point decimal with an i128 mantissa.
    Decimal {
        /// Digits after the decimal point.
        scale: u8,
    },
    /// UTF-8 text.
    Text,
    /// Microseconds since Unix epoch.
    Timestamp,
}

impl ColumnType {
    /// Returns true if a non-null `value` can be stored in a column of this type.
    ///
    /// Decimals with a smaller scale are accepted and widened on insert.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Int64, Value::Int64(_)) => true,
            (Self::Float64, Value::Float64(_)) => true,
            (Self::Decimal { scale }, Value::Decimal { scale: s, .. }) => s <= scale,
            (Self::Decimal { .. }, Value::Int64(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            _ => false,
        }
    }

    /// Returns true for types whose values are totally ordered integers.
    #[must_use]
    pub const fn is_integral(&self) -> bool {
        matches!(self, Self::Int64 | Self::Decimal { .. } | Self::Timestamp)
    }

    /// Returns true for types that can be summed and averaged.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64 | Self::Float64 | Self::Decimal { .. })
    }

    /// Stable single-byte tag used by encodings.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Bool => 1,
            Self::Int64 => 2,
            Self::Float64 => 3,
            Self::Decimal { .. } => 4,
            Self::Text => 5,
            Self::Timestamp => 6,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "BOOL"),
            Self::Int64 => write!(f, "INT64"),
            Self::Float64 => write!(f, "FLOAT64"),
            Self::Decimal { scale } => write!(f, "DECIMAL({})", scale),
            Self::Text => write!(f, "TEXT"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

/// A single typed value.
#[derive(Debug, Clone)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int64(i64),
    /// Floating-point value.
    Float64(f64),
    /// Decimal value (stored as scaled integer).
    Decimal {
        /// Mantissa.
        value: i128,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// Text value.
    Text(String),
    /// Timestamp value.
    Timestamp(Timestamp),
}

/// An ordered list of values matching a table schema.
pub type Row = Vec<Value>;

impl Value {
    /// Creates a decimal value from a mantissa and scale.
    #[must_use]
    pub const fn decimal(value: i128, scale: u8) -> Self {
        Self::Decimal { value, scale }
    }

    /// Creates the value of an unsigned key such as `_row_id` or `_seq`.
    ///
    /// Keys are carried as scale-0 decimals so the full `u64` range orders
    /// correctly against each other and against `Int64` literals.
    #[must_use]
    pub const fn unsigned(value: u64) -> Self {
        Self::Decimal {
            value: value as i128,
            scale: 0,
        }
    }

    /// Creates a text value.
    #[must_use]
    pub fn text(v: impl Into<String>) -> Self {
        Self::Text(v.into())
    }

    /// Returns true if this value is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the column type of a non-null value.
    #[must_use]
    pub const fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Int64(_) => Some(ColumnType::Int64),
            Self::Float64(_) => Some(ColumnType::Float64),
            Self::Decimal { scale, .. } => Some(ColumnType::Decimal { scale: *scale }),
            Self::Text(_) => Some(ColumnType::Text),
            Self::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Converts this value to an f64.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            Self::Decimal { value, scale } => Some(*value as f64 / 10f64.powi(i32::from(*scale))),
            Self::Timestamp(ts) => Some(ts.as_micros() as f64),
            _ => None,
        }
    }

    /// Returns the integer representation of integral values.
    ///
    /// Decimals return their mantissa and timestamps their microseconds.
    #[must_use]
    pub fn to_i128(&self) -> Option<i128> {
        match self {
            Self::Int64(v) => Some(i128::from(*v)),
            Self::Decimal { value, .. } => Some(*value),
            Self::Timestamp(ts) => Some(i128::from(ts.as_micros())),
            _ => None,
        }
    }

    /// Rescales a decimal (or integer) to `target` digits after the point.
    ///
    /// Returns `None` when narrowing would lose digits or the mantissa overflows.
    #[must_use]
    pub fn rescale(&self, target: u8) -> Option<Self> {
        let (value, scale) = match self {
            Self::Decimal { value, scale } => (*value, *scale),
            Self::Int64(v) => (i128::from(*v), 0),
            _ => return None,
        };
        if scale > target {
            return None;
        }
        let factor = 10i128.checked_pow(u32::from(target - scale))?;
        Some(Self::Decimal {
            value: value.checked_mul(factor)?,
            scale: target,
        })
    }

    /// Compares two values with query semantics.
    ///
    /// NULL compares as unknown (`None`). Numeric values of different types
    /// compare by magnitude; decimals are aligned exactly when possible.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (
                Self::Decimal { .. } | Self::Int64(_),
                Self::Decimal { .. } | Self::Int64(_),
            ) => {
                let scale = self.scale().max(other.scale());
                match (self.rescale(scale), other.rescale(scale)) {
                    (Some(Self::Decimal { value: a, .. }), Some(Self::Decimal { value: b, .. })) => {
                        Some(a.cmp(&b))
                    }
                    _ => self.to_f64()?.partial_cmp(&other.to_f64()?),
                }
            }
            (Self::Float64(_), Self::Decimal { .. } | Self::Int64(_))
            | (Self::Decimal { .. } | Self::Int64(_), Self::Float64(_)) => {
                self.to_f64()?.partial_cmp(&other.to_f64()?)
            }
            _ => None,
        }
    }

    fn scale(&self) -> u8 {
        match self {
            Self::Decimal { scale, .. } => *scale,
            _ => 0,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int64(_) => 2,
            Self::Float64(_) => 3,
            Self::Decimal { .. } => 4,
            Self::Text(_) => 5,
            Self::Timestamp(_) => 6,
        }
    }

    /// Encodes this value into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.rank());
        match self {
            Self::Null => {}
            Self::Bool(b) => buf.put_u8(u8::from(*b)),
            Self::Int64(v) => buf.put_i64_le(*v),
            Self::Float64(v) => buf.put_f64_le(*v),
            Self::Decimal { value, scale } => {
                buf.put_i128_le(*value);
                buf.put_u8(*scale);
            }
            Self::Text(s) => {
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Self::Timestamp(ts) => buf.put_u64_le(ts.as_micros()),
        }
    }

    /// Returns the number of bytes `encode` writes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int64(_) | Self::Float64(_) | Self::Timestamp(_) => 8,
            Self::Decimal { .. } => 17,
            Self::Text(s) => 4 + s.len(),
        }
    }

    /// Decodes one value from `buf`.
    pub fn decode(buf: &mut impl Buf) -> TandemResult<Self> {
        let tag = take(buf, 1)?.get_u8();
        let value = match tag {
            0 => Self::Null,
            1 => Self::Bool(take(buf, 1)?.get_u8() != 0),
            2 => Self::Int64(take(buf, 8)?.get_i64_le()),
            3 => Self::Float64(take(buf, 8)?.get_f64_le()),
            4 => {
                let value = take(buf, 17)?.get_i128_le();
                Self::Decimal {
                    value,
                    scale: buf.get_u8(),
                }
            }
            5 => {
                let len = take(buf, 4)?.get_u32_le() as usize;
                let bytes = take(buf, len)?.copy_to_bytes(len);
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| TandemError::corruption("text value is not valid UTF-8"))?;
                Self::Text(text)
            }
            6 => Self::Timestamp(Timestamp::from_micros(take(buf, 8)?.get_u64_le())),
            other => {
                return Err(TandemError::corruption(format!(
                    "unknown value tag {}",
                    other
                )))
            }
        };
        Ok(value)
    }
}

fn take<B: Buf>(buf: &mut B, needed: usize) -> TandemResult<&mut B> {
    if buf.remaining() < needed {
        return Err(TandemError::corruption(format!(
            "truncated value: need {} bytes, have {}",
            needed,
            buf.remaining()
        )));
    }
    Ok(buf)
}

/// Encodes a row as a value count followed by the values.
pub fn encode_row(row: &[Value], buf: &mut impl BufMut) {
    buf.put_u16_le(row.len() as u16);
    for value in row {
        value.encode(buf);
    }
}

/// Returns the number of bytes `encode_row` writes.
#[must_use]
pub fn encoded_row_len(row: &[Value]) -> usize {
    2 + row.iter().map(Value::encoded_len).sum::<usize>()
}

/// Decodes a row written by [`encode_row`].
pub fn decode_row(buf: &mut impl Buf) -> TandemResult<Row> {
    let count = take(buf, 2)?.get_u16_le() as usize;
    let mut row = Vec::with_capacity(count);
    for _ in 0..count {
        row.push(Value::decode(buf)?);
    }
    Ok(row)
}

// Structural equality: floats compare by bit pattern so values can key
// hash maps (group-by) and decimals with different scales are distinct.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.total_cmp(b),
            (
                Self::Decimal { value: a, scale: sa },
                Self::Decimal { value: b, scale: sb },
            ) => sa.cmp(sb).then_with(|| a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int64(i) => i.hash(state),
            Self::Float64(f) => f.to_bits().hash(state),
            Self::Decimal { value, scale } => {
                value.hash(state);
                scale.hash(state);
            }
            Self::Text(s) => s.hash(state),
            Self::Timestamp(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int64(i) => write!(f, "{}", i),
            Self::Float64(v) => write!(f, "{}", v),
            Self::Decimal { value, scale } => {
                if *scale == 0 {
                    write!(f, "{}", value)
                } else {
                    let divisor = 10u128.pow(u32::from(*scale));
                    let magnitude = value.unsigned_abs();
                    let sign = if *value < 0 { "-" } else { "" };
                    write!(
                        f,
                        "{}{}.{:0>width$}",
                        sign,
                        magnitude / divisor,
                        magnitude % divisor,
                        width = *scale as usize
                    )
                }
            }
            Self::Text(s) => write!(f, "{}", s),
            Self::Timestamp(t) => write!(f, "{}", t),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Self::Timestamp(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_decimal_display() {
        assert_eq!(Value::decimal(500_000, 2).to_string(), "5000.00");
        assert_eq!(Value::decimal(-5, 2).to_string(), "-0.05");
        assert_eq!(Value::decimal(42, 0).to_string(), "42");
    }

    #[test]
    fn test_compare_numeric_across_types() {
        let a = Value::decimal(500_000, 2);
        let b = Value::decimal(50_000_000, 4);
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
        assert_eq!(Value::Int64(5000).compare(&a), Some(Ordering::Equal));
        assert_eq!(Value::Float64(4999.5).compare(&a), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&a), None);
        assert_eq!(Value::text("x").compare(&a), None);
    }

    #[test]
    fn test_structural_ordering_is_total() {
        let mut values = vec![
            Value::text("b"),
            Value::Null,
            Value::Int64(3),
            Value::Float64(f64::NAN),
            Value::Float64(1.0),
            Value::text("a"),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Int64(3));
        assert_eq!(values[2], Value::Float64(1.0));
        assert_eq!(values[4], Value::text("a"));
    }

    #[test]
    fn test_rescale() {
        assert_eq!(
            Value::decimal(5, 1).rescale(3),
            Some(Value::decimal(500, 3))
        );
        assert_eq!(Value::Int64(7).rescale(2), Some(Value::decimal(700, 2)));
        assert_eq!(Value::decimal(5, 3).rescale(1), None);
        assert_eq!(Value::text("no").rescale(1), None);
    }

    #[test]
    fn test_row_codec() {
        let row = vec![
            Value::decimal(500_000, 2),
            Value::text("DEPOSIT"),
            Value::Null,
            Value::Bool(true),
            Value::Timestamp(Timestamp::from_micros(99)),
        ];
        let mut buf = BytesMut::new();
        encode_row(&row, &mut buf);
        assert_eq!(buf.len(), encoded_row_len(&row));

        let decoded = decode_row(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = BytesMut::new();
        encode_row(&[Value::text("DEPOSIT")], &mut buf);
        let truncated = buf.split_to(buf.len() - 2).freeze();
        let err = decode_row(&mut truncated.clone()).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Corruption);
    }

    #[test]
    fn test_column_type_accepts() {
        let decimal = ColumnType::Decimal { scale: 2 };
        assert!(decimal.accepts(&Value::decimal(1, 2)));
        assert!(decimal.accepts(&Value::decimal(1, 1)));
        assert!(decimal.accepts(&Value::Int64(1)));
        assert!(!decimal.accepts(&Value::decimal(1, 3)));
        assert!(!ColumnType::Text.accepts(&Value::Int64(1)));
        assert!(ColumnType::Text.accepts(&Value::Null));
    }
}
