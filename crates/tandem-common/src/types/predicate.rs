//! Row predicates.
//!
//! A [`Predicate`] names columns; [`Predicate::bind`] resolves the names
//! against a schema once so evaluation works on column positions. The row
//! key and the commit sequence are addressable as the pseudo columns
//! `_row_id` and `_seq`, bound to positions `arity` and `arity + 1`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{RowId, SeqNo, TableSchema, Value};
use crate::constants::{ROW_ID_COLUMN, SEQ_COLUMN};
use crate::error::{TandemError, TandemResult};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// Returns true if `ordering` (lhs compared to rhs) satisfies the operator.
    #[inline]
    #[must_use]
    pub const fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::NotEq => !matches!(ordering, Ordering::Equal),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::LtEq => !matches!(ordering, Ordering::Greater),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::GtEq => !matches!(ordering, Ordering::Less),
        }
    }
}

/// A filter over named columns.
///
/// # Example
///
/// ```rust
/// use tandem_common::types::{CompareOp, Predicate, Value};
///
/// let deposits = Predicate::eq("type", Value::text("DEPOSIT"))
///     .and(Predicate::compare("amount", CompareOp::Gt, Value::decimal(0, 2)));
/// assert_eq!(deposits.columns(), vec!["type", "amount"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    True,
    /// `column op value`; NULL never matches.
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Literal operand.
        value: Value,
    },
    /// `column IS NULL`.
    IsNull(String),
    /// `column IS NOT NULL`.
    IsNotNull(String),
    /// Conjunction.
    And(Vec<Predicate>),
    /// Disjunction.
    Or(Vec<Predicate>),
    /// Negation (two-valued: a NULL comparison negates to true).
    Not(Box<Predicate>),
}

impl Predicate {
    /// Builds a comparison.
    #[must_use]
    pub fn compare(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    /// Builds an equality comparison.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// Conjunction with another predicate, flattening nested ANDs.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::True, p) | (p, Self::True) => p,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), p) => {
                left.push(p);
                Self::And(left)
            }
            (p, q) => Self::And(vec![p, q]),
        }
    }

    /// Returns the referenced column names in first-use order.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::True => {}
            Self::Compare { column, .. } | Self::IsNull(column) | Self::IsNotNull(column) => {
                if !out.contains(&column.as_str()) {
                    out.push(column.as_str());
                }
            }
            Self::And(children) | Self::Or(children) => {
                children.iter().for_each(|c| c.collect_columns(out));
            }
            Self::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Resolves column names against `schema`.
    pub fn bind(&self, schema: &TableSchema) -> TandemResult<BoundPredicate> {
        let resolve = |name: &str| -> TandemResult<usize> {
            match name {
                ROW_ID_COLUMN => Ok(schema.arity()),
                SEQ_COLUMN => Ok(schema.arity() + 1),
                _ => schema.column_index(name).ok_or_else(|| {
                    TandemError::schema_mismatch(format!(
                        "column '{}' not found in table '{}'",
                        name, schema.name
                    ))
                }),
            }
        };
        Ok(match self {
            Self::True => BoundPredicate::True,
            Self::Compare { column, op, value } => BoundPredicate::Compare {
                column: resolve(column.as_str())?,
                op: *op,
                value: value.clone(),
            },
            Self::IsNull(column) => BoundPredicate::IsNull(resolve(column.as_str())?),
            Self::IsNotNull(column) => BoundPredicate::IsNotNull(resolve(column.as_str())?),
            Self::And(children) => BoundPredicate::And(
                children
                    .iter()
                    .map(|c| c.bind(schema))
                    .collect::<TandemResult<_>>()?,
            ),
            Self::Or(children) => BoundPredicate::Or(
                children
                    .iter()
                    .map(|c| c.bind(schema))
                    .collect::<TandemResult<_>>()?,
            ),
            Self::Not(inner) => BoundPredicate::Not(Box::new(inner.bind(schema)?)),
        })
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self::True
    }
}

/// A predicate whose columns are resolved to positions.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundPredicate {
    /// Matches every row.
    True,
    /// `values[column] op value`.
    Compare {
        /// Column position.
        column: usize,
        /// Operator.
        op: CompareOp,
        /// Literal operand.
        value: Value,
    },
    /// `values[column] IS NULL`.
    IsNull(usize),
    /// `values[column] IS NOT NULL`.
    IsNotNull(usize),
    /// Conjunction.
    And(Vec<BoundPredicate>),
    /// Disjunction.
    Or(Vec<BoundPredicate>),
    /// Negation.
    Not(Box<BoundPredicate>),
}

impl BoundPredicate {
    /// Evaluates the predicate on one value.
    #[inline]
    #[must_use]
    pub fn compare_value(op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
        lhs.compare(rhs).map_or(false, |ord| op.matches(ord))
    }

    /// Evaluates against a row image plus its pseudo columns.
    #[must_use]
    pub fn eval_row(&self, row_id: RowId, seq: SeqNo, values: &[Value]) -> bool {
        let arity = values.len();
        let fetch = |column: usize| -> Value {
            if column == arity {
                Value::unsigned(row_id.as_u64())
            } else if column == arity + 1 {
                Value::unsigned(seq.as_u64())
            } else {
                values.get(column).cloned().unwrap_or(Value::Null)
            }
        };
        match self {
            Self::True => true,
            Self::Compare { column, op, value } => Self::compare_value(*op, &fetch(*column), value),
            Self::IsNull(column) => fetch(*column).is_null(),
            Self::IsNotNull(column) => !fetch(*column).is_null(),
            Self::And(children) => children.iter().all(|c| c.eval_row(row_id, seq, values)),
            Self::Or(children) => children.iter().any(|c| c.eval_row(row_id, seq, values)),
            Self::Not(inner) => !inner.eval_row(row_id, seq, values),
        }
    }

    /// Returns the referenced column positions, sorted and deduplicated.
    #[must_use]
    pub fn column_positions(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect(&self, out: &mut Vec<usize>) {
        match self {
            Self::True => {}
            Self::Compare { column, .. } | Self::IsNull(column) | Self::IsNotNull(column) => {
                out.push(*column);
            }
            Self::And(children) | Self::Or(children) => {
                children.iter().for_each(|c| c.collect(out));
            }
            Self::Not(inner) => inner.collect(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDef, ColumnType, TableId};

    fn schema() -> TableSchema {
        TableSchema::new(
            TableId::new(1),
            "accounts",
            vec![
                ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
                ColumnDef::new("type", ColumnType::Text),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_bind_and_eval() {
        let pred = Predicate::eq("type", Value::text("DEPOSIT")).and(Predicate::compare(
            "amount",
            CompareOp::GtEq,
            Value::Int64(100),
        ));
        let bound = pred.bind(&schema()).unwrap();
        let row = vec![Value::decimal(500_000, 2), Value::text("DEPOSIT")];
        assert!(bound.eval_row(RowId::new(1), SeqNo::new(1), &row));

        let small = vec![Value::decimal(5_000, 2), Value::text("DEPOSIT")];
        assert!(!bound.eval_row(RowId::new(1), SeqNo::new(1), &small));
        assert_eq!(bound.column_positions(), vec![0, 1]);
    }

    #[test]
    fn test_pseudo_columns() {
        let pred = Predicate::eq("_row_id", Value::Int64(12345));
        let bound = pred.bind(&schema()).unwrap();
        assert_eq!(bound.column_positions(), vec![2]);
        let row = vec![Value::Null, Value::Null];
        assert!(bound.eval_row(RowId::new(12345), SeqNo::new(9), &row));
        assert!(!bound.eval_row(RowId::new(1), SeqNo::new(9), &row));
    }

    #[test]
    fn test_row_id_compares_unsigned() {
        let high = RowId::new(u64::MAX - 1);
        let row = vec![Value::Null, Value::Null];
        let upper = Predicate::compare("_row_id", CompareOp::LtEq, Value::unsigned(u64::MAX))
            .bind(&schema())
            .unwrap();
        assert!(upper.eval_row(high, SeqNo::new(1), &row));
        assert!(upper.eval_row(RowId::new(0), SeqNo::new(1), &row));

        let above_small = Predicate::compare("_row_id", CompareOp::Gt, Value::Int64(10))
            .bind(&schema())
            .unwrap();
        assert!(above_small.eval_row(high, SeqNo::new(1), &row));
        assert!(!above_small.eval_row(RowId::new(3), SeqNo::new(1), &row));
    }

    #[test]
    fn test_null_semantics() {
        let bound = Predicate::eq("type", Value::text("X"))
            .bind(&schema())
            .unwrap();
        let row = vec![Value::Null, Value::Null];
        assert!(!bound.eval_row(RowId::new(1), SeqNo::new(1), &row));
        let is_null = Predicate::IsNull("type".into()).bind(&schema()).unwrap();
        assert!(is_null.eval_row(RowId::new(1), SeqNo::new(1), &row));
    }

    #[test]
    fn test_bind_unknown_column() {
        assert!(Predicate::eq("missing", Value::Int64(1))
            .bind(&schema())
            .is_err());
    }
}
