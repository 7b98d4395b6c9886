//! Column encodings.
//!
//! Every encoding is a pure function of the input values, so encoding the
//! same values twice yields the same bytes. Layouts (all integers little
//! endian):
//!
//! ```text
//! Plain:      | value | value | ...
//! Dictionary: | dict_len (u32) | value * dict_len | code_width (u8) | code * rows |
//! RunLength:  | run_count (u32) | (run_len (u32) | value) * run_count |
//! Delta:      | first (i128) | zigzag varint delta * (rows - 1) |
//! ```
//!
//! Values inside the layouts use the tagged value encoding from
//! `tandem_common::types::Value::encode`. Dictionary codes are assigned in
//! order of first appearance.

use std::collections::{HashMap, HashSet};
use std::fmt;

use bytes::{Buf, BufMut};

use tandem_common::config::ColumnStoreConfig;
use tandem_common::types::{ColumnType, Timestamp, Value};
use tandem_common::{TandemError, TandemResult};

/// Share of same-signed deltas that makes a column "trending".
const DELTA_TREND_RATIO: f64 = 0.9;

/// Physical encoding of one column chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoding {
    /// Values stored one after another.
    Plain = 0,
    /// Distinct values stored once, rows refer to them by code.
    Dictionary = 1,
    /// Runs of equal values stored as (length, value).
    RunLength = 2,
    /// First value followed by varint differences.
    Delta = 3,
}

impl Encoding {
    /// Decodes the encoding tag.
    pub fn from_u8(tag: u8) -> TandemResult<Self> {
        match tag {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Dictionary),
            2 => Ok(Self::RunLength),
            3 => Ok(Self::Delta),
            other => Err(TandemError::corruption(format!(
                "unknown column encoding {}",
                other
            ))),
        }
    }

    /// Returns a short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Dictionary => "dictionary",
            Self::RunLength => "rle",
            Self::Delta => "delta",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value statistics that drive the encoding choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnProfile {
    /// Number of values.
    pub rows: usize,
    /// Number of NULLs.
    pub nulls: usize,
    /// Number of distinct values, NULL included.
    pub distinct: usize,
    /// Number of runs of equal adjacent values.
    pub runs: usize,
    /// True if the column is integral, has no NULLs and its deltas mostly share a sign.
    pub trending: bool,
}

impl ColumnProfile {
    /// Profiles a column.
    #[must_use]
    pub fn of(column_type: ColumnType, values: &[Value]) -> Self {
        let nulls = values.iter().filter(|v| v.is_null()).count();
        let distinct = values.iter().collect::<HashSet<_>>().len();
        let runs = if values.is_empty() {
            0
        } else {
            1 + values.windows(2).filter(|w| w[0] != w[1]).count()
        };

        let trending = column_type.is_integral() && nulls == 0 && values.len() >= 2 && {
            let mut rising = 0usize;
            let mut falling = 0usize;
            for pair in values.windows(2) {
                match (pair[0].to_i128(), pair[1].to_i128()) {
                    (Some(a), Some(b)) if b >= a => rising += 1,
                    (Some(_), Some(_)) => falling += 1,
                    _ => {}
                }
            }
            let steps = (values.len() - 1) as f64;
            rising.max(falling) as f64 / steps >= DELTA_TREND_RATIO
        };

        Self {
            rows: values.len(),
            nulls,
            distinct,
            runs,
            trending,
        }
    }

    /// Average length of a run of equal values.
    #[must_use]
    pub fn average_run(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.rows as f64 / self.runs as f64
        }
    }

    /// Distinct values per row.
    #[must_use]
    pub fn distinct_ratio(&self) -> f64 {
        if self.rows == 0 {
            1.0
        } else {
            self.distinct as f64 / self.rows as f64
        }
    }
}

/// Picks the encoding for a column.
///
/// Long runs win first, then low-cardinality and text columns get a
/// dictionary, then trending integral columns get deltas.
#[must_use]
pub fn choose_encoding(
    column_type: ColumnType,
    profile: &ColumnProfile,
    config: &ColumnStoreConfig,
) -> Encoding {
    if profile.rows == 0 {
        return Encoding::Plain;
    }
    if profile.rows > 1 && profile.average_run() >= config.rle_min_average_run {
        return Encoding::RunLength;
    }
    if matches!(column_type, ColumnType::Text)
        || profile.distinct_ratio() <= config.dictionary_max_distinct_ratio
    {
        return Encoding::Dictionary;
    }
    if profile.trending {
        return Encoding::Delta;
    }
    Encoding::Plain
}

/// Encodes `values` into `buf`.
pub fn encode_values(
    encoding: Encoding,
    column_type: ColumnType,
    values: &[Value],
    buf: &mut impl BufMut,
) -> TandemResult<()> {
    match encoding {
        Encoding::Plain => {
            values.iter().for_each(|v| v.encode(buf));
            Ok(())
        }
        Encoding::Dictionary => {
            encode_dictionary(values, buf);
            Ok(())
        }
        Encoding::RunLength => {
            encode_runs(values, buf);
            Ok(())
        }
        Encoding::Delta => encode_delta(column_type, values, buf),
    }
}

/// Decodes `rows` values from `data`.
pub fn decode_values(
    encoding: Encoding,
    column_type: ColumnType,
    rows: usize,
    data: &[u8],
) -> TandemResult<Vec<Value>> {
    let mut buf = data;
    let values = match encoding {
        Encoding::Plain => {
            let mut values = Vec::with_capacity(rows);
            for _ in 0..rows {
                values.push(Value::decode(&mut buf)?);
            }
            values
        }
        Encoding::Dictionary => decode_dictionary(rows, &mut buf)?,
        Encoding::RunLength => decode_runs(rows, &mut buf)?,
        Encoding::Delta => decode_delta(column_type, rows, &mut buf)?,
    };
    if values.len() != rows || buf.has_remaining() {
        return Err(TandemError::corruption(format!(
            "{} chunk decoded {} of {} rows with {} bytes left",
            encoding,
            values.len(),
            rows,
            buf.remaining()
        )));
    }
    Ok(values)
}

fn need(buf: &[u8], len: usize, what: &str) -> TandemResult<()> {
    if buf.len() < len {
        Err(TandemError::corruption(format!("truncated {}", what)))
    } else {
        Ok(())
    }
}

fn encode_dictionary(values: &[Value], buf: &mut impl BufMut) {
    let mut codes: HashMap<&Value, u32> = HashMap::new();
    let mut dictionary: Vec<&Value> = Vec::new();
    let mut rows = Vec::with_capacity(values.len());
    for value in values {
        let code = *codes.entry(value).or_insert_with(|| {
            dictionary.push(value);
            (dictionary.len() - 1) as u32
        });
        rows.push(code);
    }

    buf.put_u32_le(dictionary.len() as u32);
    dictionary.iter().for_each(|v| v.encode(buf));
    if dictionary.len() <= usize::from(u16::MAX) {
        buf.put_u8(2);
        rows.iter().for_each(|c| buf.put_u16_le(*c as u16));
    } else {
        buf.put_u8(4);
        rows.iter().for_each(|c| buf.put_u32_le(*c));
    }
}

fn decode_dictionary(rows: usize, buf: &mut &[u8]) -> TandemResult<Vec<Value>> {
    need(buf, 4, "dictionary header")?;
    let len = buf.get_u32_le() as usize;
    let mut dictionary = Vec::with_capacity(len.min(rows));
    for _ in 0..len {
        dictionary.push(Value::decode(buf)?);
    }
    need(buf, 1, "dictionary code width")?;
    let width = buf.get_u8();
    if width != 2 && width != 4 {
        return Err(TandemError::corruption(format!(
            "invalid dictionary code width {}",
            width
        )));
    }
    need(buf, rows * usize::from(width), "dictionary codes")?;

    let mut values = Vec::with_capacity(rows);
    for _ in 0..rows {
        let code = if width == 2 {
            buf.get_u16_le() as usize
        } else {
            buf.get_u32_le() as usize
        };
        let value = dictionary.get(code).ok_or_else(|| {
            TandemError::corruption(format!("dictionary code {} out of {}", code, len))
        })?;
        values.push(value.clone());
    }
    Ok(values)
}

fn encode_runs(values: &[Value], buf: &mut impl BufMut) {
    let mut runs: Vec<(u32, &Value)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    buf.put_u32_le(runs.len() as u32);
    for (count, value) in runs {
        buf.put_u32_le(count);
        value.encode(buf);
    }
}

fn decode_runs(rows: usize, buf: &mut &[u8]) -> TandemResult<Vec<Value>> {
    need(buf, 4, "run header")?;
    let runs = buf.get_u32_le();
    let mut values = Vec::with_capacity(rows);
    for _ in 0..runs {
        need(buf, 4, "run length")?;
        let count = buf.get_u32_le() as usize;
        let value = Value::decode(buf)?;
        if values.len() + count > rows {
            return Err(TandemError::corruption("run lengths exceed row count"));
        }
        values.extend(std::iter::repeat(value).take(count));
    }
    Ok(values)
}

fn zigzag(v: i128) -> u128 {
    ((v << 1) ^ (v >> 127)) as u128
}

fn unzigzag(u: u128) -> i128 {
    ((u >> 1) as i128) ^ -((u & 1) as i128)
}

fn put_varint(buf: &mut impl BufMut, mut v: u128) {
    while v >= 0x80 {
        buf.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

fn get_varint(buf: &mut &[u8]) -> TandemResult<u128> {
    let mut value = 0u128;
    let mut shift = 0u32;
    loop {
        need(buf, 1, "delta varint")?;
        let byte = buf.get_u8();
        if shift > 127 {
            return Err(TandemError::corruption("delta varint overflow"));
        }
        value |= u128::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn delta_operand(column_type: ColumnType, value: &Value) -> TandemResult<i128> {
    if value.column_type() != Some(column_type) {
        return Err(TandemError::encoding(format!(
            "delta encoding needs {} values, found {:?}",
            column_type, value
        )));
    }
    value
        .to_i128()
        .ok_or_else(|| TandemError::encoding(format!("{:?} is not integral", value)))
}

fn encode_delta(column_type: ColumnType, values: &[Value], buf: &mut impl BufMut) -> TandemResult<()> {
    if !column_type.is_integral() {
        return Err(TandemError::encoding(format!(
            "delta encoding does not apply to {}",
            column_type
        )));
    }
    let operands = values
        .iter()
        .map(|v| delta_operand(column_type, v))
        .collect::<TandemResult<Vec<_>>>()?;
    let Some(first) = operands.first() else {
        return Ok(());
    };
    buf.put_i128_le(*first);
    for pair in operands.windows(2) {
        put_varint(buf, zigzag(pair[1].wrapping_sub(pair[0])));
    }
    Ok(())
}

fn delta_value(column_type: ColumnType, raw: i128) -> TandemResult<Value> {
    let out_of_range = || TandemError::corruption(format!("delta value {} out of range", raw));
    match column_type {
        ColumnType::Int64 => Ok(Value::Int64(i64::try_from(raw).map_err(|_| out_of_range())?)),
        ColumnType::Decimal { scale } => Ok(Value::decimal(raw, scale)),
        ColumnType::Timestamp => Ok(Value::Timestamp(Timestamp::from_micros(
            u64::try_from(raw).map_err(|_| out_of_range())?,
        ))),
        other => Err(TandemError::corruption(format!(
            "delta chunk for {} column",
            other
        ))),
    }
}

fn decode_delta(column_type: ColumnType, rows: usize, buf: &mut &[u8]) -> TandemResult<Vec<Value>> {
    let mut values = Vec::with_capacity(rows);
    if rows == 0 {
        return Ok(values);
    }
    need(buf, 16, "delta base")?;
    let mut current = buf.get_i128_le();
    values.push(delta_value(column_type, current)?);
    for _ in 1..rows {
        current = current.wrapping_add(unzigzag(get_varint(buf)?));
        values.push(delta_value(column_type, current)?);
    }
    Ok(values)
}
