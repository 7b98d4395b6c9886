//! Mergeable aggregates.
//!
//! Scans compute one [`AggregatePartial`] per chunk group. Partials merge
//! associatively; [`fold_partials`] combines them in chunk-id order, so the
//! order in which groups were processed never changes the result. Integer
//! and decimal sums are exact (`i128`); float sums depend only on the fold
//! order, which is fixed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use tandem_common::types::{ChunkId, ColumnType, Row, TableSchema, Value};
use tandem_common::{TandemError, TandemResult};

use crate::sketch::QuantileSketch;

/// One aggregate function over a column.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFunction {
    /// Number of rows.
    Count,
    /// Number of non-null values.
    CountColumn(String),
    /// Sum of non-null values.
    Sum(String),
    /// Smallest non-null value.
    Min(String),
    /// Largest non-null value.
    Max(String),
    /// Mean of non-null values.
    Avg(String),
    /// Approximate quantile `q` in `[0, 1]`.
    Percentile(String, f64),
}

impl AggregateFunction {
    /// Returns the aggregated column.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Count => None,
            Self::CountColumn(c)
            | Self::Sum(c)
            | Self::Min(c)
            | Self::Max(c)
            | Self::Avg(c)
            | Self::Percentile(c, _) => Some(c),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count(*)"),
            Self::CountColumn(c) => write!(f, "count({})", c),
            Self::Sum(c) => write!(f, "sum({})", c),
            Self::Min(c) => write!(f, "min({})", c),
            Self::Max(c) => write!(f, "max({})", c),
            Self::Avg(c) => write!(f, "avg({})", c),
            Self::Percentile(c, q) => write!(f, "percentile({}, {})", c, q),
        }
    }
}

/// Aggregates to compute, optionally per group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Aggregate {
    /// Functions, in output order.
    pub functions: Vec<AggregateFunction>,
    /// Grouping columns.
    pub group_by: Vec<String>,
}

impl Aggregate {
    /// Creates an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function.
    #[must_use]
    pub fn with(mut self, function: AggregateFunction) -> Self {
        self.functions.push(function);
        self
    }

    /// Adds `count(*)`.
    #[must_use]
    pub fn count(self) -> Self {
        self.with(AggregateFunction::Count)
    }

    /// Adds `sum(column)`.
    #[must_use]
    pub fn sum(self, column: impl Into<String>) -> Self {
        self.with(AggregateFunction::Sum(column.into()))
    }

    /// Adds a grouping column.
    #[must_use]
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Resolves column names against `schema`.
    pub fn bind(&self, schema: &TableSchema) -> TandemResult<BoundAggregate> {
        if self.functions.is_empty() {
            return Err(TandemError::unsupported("aggregate without functions"));
        }
        let resolve = |name: &str| {
            schema
                .column_index(name)
                .map(|i| (i, schema.columns[i].column_type))
                .ok_or_else(|| {
                    TandemError::schema_mismatch(format!(
                        "unknown column '{}' in table '{}'",
                        name, schema.name
                    ))
                })
        };

        let mut functions = Vec::with_capacity(self.functions.len());
        for function in &self.functions {
            let input = function.column().map(|c| resolve(c)).transpose()?;
            let kind = match function {
                AggregateFunction::Count => Kind::Count,
                AggregateFunction::CountColumn(_) => Kind::CountColumn,
                AggregateFunction::Sum(_) | AggregateFunction::Avg(_) => {
                    let numeric = input.map_or(false, |(_, t)| t.is_numeric());
                    if !numeric {
                        return Err(TandemError::schema_mismatch(format!(
                            "{} needs a numeric column",
                            function
                        )));
                    }
                    if matches!(function, AggregateFunction::Sum(_)) {
                        Kind::Sum
                    } else {
                        Kind::Avg
                    }
                }
                AggregateFunction::Min(_) => Kind::Min,
                AggregateFunction::Max(_) => Kind::Max,
                AggregateFunction::Percentile(_, q) => {
                    let sketchable = input
                        .map_or(false, |(_, t)| t.is_numeric() || t == ColumnType::Timestamp);
                    if !sketchable {
                        return Err(TandemError::schema_mismatch(format!(
                            "{} needs a numeric column",
                            function
                        )));
                    }
                    if !(0.0..=1.0).contains(q) {
                        return Err(TandemError::unsupported(format!(
                            "percentile {} outside [0, 1]",
                            q
                        )));
                    }
                    Kind::Percentile(*q)
                }
            };
            functions.push(BoundFunction {
                kind,
                input: input.map(|(i, _)| i),
                column_type: input.map(|(_, t)| t),
            });
        }

        let group_by = self
            .group_by
            .iter()
            .map(|name| resolve(name).map(|(i, _)| i))
            .collect::<TandemResult<Vec<_>>>()?;

        let mut labels: Vec<String> = self.group_by.clone();
        labels.extend(self.functions.iter().map(ToString::to_string));

        Ok(BoundAggregate {
            functions,
            group_by,
            labels,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Count,
    CountColumn,
    Sum,
    Avg,
    Min,
    Max,
    Percentile(f64),
}

#[derive(Debug, Clone, PartialEq)]
struct BoundFunction {
    kind: Kind,
    input: Option<usize>,
    column_type: Option<ColumnType>,
}

/// An aggregate resolved to column positions.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundAggregate {
    functions: Vec<BoundFunction>,
    group_by: Vec<usize>,
    labels: Vec<String>,
}

impl BoundAggregate {
    /// Returns the column positions read by the aggregate.
    #[must_use]
    pub fn column_positions(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .functions
            .iter()
            .filter_map(|f| f.input)
            .chain(self.group_by.iter().copied())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Creates an empty partial for this aggregate.
    #[must_use]
    pub fn partial(&self) -> AggregatePartial {
        AggregatePartial {
            groups: BTreeMap::new(),
        }
    }

    fn initial_states(&self) -> Vec<AggState> {
        self.functions
            .iter()
            .map(|f| match (f.kind, f.column_type) {
                (Kind::Count | Kind::CountColumn, _) => AggState::Count(0),
                (Kind::Sum | Kind::Avg, Some(ColumnType::Float64)) => AggState::FloatSum { sum: 0.0, count: 0 },
                (Kind::Sum | Kind::Avg, _) => AggState::ExactSum { sum: 0, count: 0 },
                (Kind::Min, _) => AggState::Min(None),
                (Kind::Max, _) => AggState::Max(None),
                (Kind::Percentile(_), _) => AggState::Sketch(QuantileSketch::default()),
            })
            .collect()
    }

    /// Feeds one row into `partial`. `value(position)` returns the row's value at a column position.
    pub fn accumulate<'v>(&self, partial: &mut AggregatePartial, value: impl Fn(usize) -> &'v Value) {
        let key: Vec<Value> = self.group_by.iter().map(|p| value(*p).clone()).collect();
        let states = partial
            .groups
            .entry(key)
            .or_insert_with(|| self.initial_states());
        for (state, function) in states.iter_mut().zip(&self.functions) {
            match function.input {
                None => state.update(&Value::Int64(1)),
                Some(position) => {
                    let v = value(position);
                    if !v.is_null() {
                        state.update(v);
                    }
                }
            }
        }
    }

    /// Produces the final result from a merged partial.
    #[must_use]
    pub fn finish(&self, partial: AggregatePartial) -> AggregateResult {
        let mut groups = partial.groups;
        if groups.is_empty() && self.group_by.is_empty() {
            groups.insert(Vec::new(), self.initial_states());
        }
        let rows = groups
            .into_iter()
            .map(|(mut key, states)| {
                key.extend(
                    states
                        .into_iter()
                        .zip(&self.functions)
                        .map(|(state, function)| state.finish(function)),
                );
                key
            })
            .collect();
        AggregateResult {
            columns: self.labels.clone(),
            group_columns: self.group_by.len(),
            rows,
        }
    }
}

fn keep_if(current: &mut Option<Value>, candidate: &Value, wins: Ordering) {
    if current
        .as_ref()
        .map_or(true, |c| candidate.compare(c) == Some(wins))
    {
        *current = Some(candidate.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AggState {
    Count(u64),
    ExactSum { sum: i128, count: u64 },
    FloatSum { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Sketch(QuantileSketch),
}

impl AggState {
    fn update(&mut self, value: &Value) {
        match self {
            Self::Count(n) => *n += 1,
            Self::ExactSum { sum, count } => {
                if let Some(v) = value.to_i128() {
                    *sum = sum.saturating_add(v);
                    *count += 1;
                }
            }
            Self::FloatSum { sum, count } => {
                if let Some(v) = value.to_f64() {
                    *sum += v;
                    *count += 1;
                }
            }
            Self::Min(current) => keep_if(current, value, Ordering::Less),
            Self::Max(current) => keep_if(current, value, Ordering::Greater),
            Self::Sketch(sketch) => {
                if let Some(v) = value.to_f64() {
                    sketch.insert(v);
                }
            }
        }
    }

    fn merge(&mut self, other: Self) {
        match (self, other) {
            (Self::Count(a), Self::Count(b)) => *a += b,
            (Self::ExactSum { sum, count }, Self::ExactSum { sum: s, count: c }) => {
                *sum = sum.saturating_add(s);
                *count += c;
            }
            (Self::FloatSum { sum, count }, Self::FloatSum { sum: s, count: c }) => {
                *sum += s;
                *count += c;
            }
            (Self::Min(current), Self::Min(Some(v))) => keep_if(current, &v, Ordering::Less),
            (Self::Max(current), Self::Max(Some(v))) => keep_if(current, &v, Ordering::Greater),
            (Self::Sketch(a), Self::Sketch(b)) => a.merge(&b),
            _ => {}
        }
    }

    fn finish(self, function: &BoundFunction) -> Value {
        match (self, function.kind) {
            (Self::Count(n), _) => Value::Int64(n as i64),
            (Self::ExactSum { count: 0, .. } | Self::FloatSum { count: 0, .. }, _) => Value::Null,
            (Self::ExactSum { sum, .. }, Kind::Sum) => match function.column_type {
                Some(ColumnType::Decimal { scale }) => Value::decimal(sum, scale),
                _ => i64::try_from(sum).map_or(Value::decimal(sum, 0), Value::Int64),
            },
            (Self::ExactSum { sum, count }, _) => {
                let scale = match function.column_type {
                    Some(ColumnType::Decimal { scale }) => scale,
                    _ => 0,
                };
                Value::Float64(sum as f64 / 10f64.powi(i32::from(scale)) / count as f64)
            }
            (Self::FloatSum { sum, .. }, Kind::Sum) => Value::Float64(sum),
            (Self::FloatSum { sum, count }, _) => Value::Float64(sum / count as f64),
            (Self::Min(v) | Self::Max(v), _) => v.unwrap_or(Value::Null),
            (Self::Sketch(sketch), Kind::Percentile(q)) => {
                sketch.quantile(q).map_or(Value::Null, Value::Float64)
            }
            (Self::Sketch(_), _) => Value::Null,
        }
    }
}

/// Aggregate state of one or more chunk groups.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePartial {
    groups: BTreeMap<Vec<Value>, Vec<AggState>>,
}

impl AggregatePartial {
    /// Folds `other` into this partial.
    pub fn merge(&mut self, other: AggregatePartial) {
        for (key, states) in other.groups {
            match self.groups.get_mut(&key) {
                Some(mine) => mine
                    .iter_mut()
                    .zip(states)
                    .for_each(|(a, b)| a.merge(b)),
                None => {
                    self.groups.insert(key, states);
                }
            }
        }
    }

    /// Returns the number of groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Merges per-chunk partials in chunk-id order.
#[must_use]
pub fn fold_partials(
    aggregate: &BoundAggregate,
    mut partials: Vec<(ChunkId, AggregatePartial)>,
) -> AggregatePartial {
    partials.sort_by_key(|(id, _)| *id);
    partials
        .into_iter()
        .fold(aggregate.partial(), |mut acc, (_, partial)| {
            acc.merge(partial);
            acc
        })
}

/// Final aggregate output.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    /// Output column labels: grouping columns, then functions.
    pub columns: Vec<String>,
    /// Number of leading grouping columns.
    pub group_columns: usize,
    /// Result rows ordered by group key.
    pub rows: Vec<Row>,
}

impl AggregateResult {
    /// Returns the row of the given group.
    #[must_use]
    pub fn group(&self, key: &[Value]) -> Option<&Row> {
        self.rows
            .iter()
            .find(|row| row.len() >= self.group_columns && &row[..self.group_columns] == key)
    }

    /// Returns the value of output column `label` in the first row.
    #[must_use]
    pub fn scalar(&self, label: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == label)?;
        self.rows.first()?.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::types::{ColumnDef, TableId};

    fn schema() -> TableSchema {
        TableSchema::new(
            TableId::new(1),
            "t",
            vec![
                ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
                ColumnDef::new("kind", ColumnType::Text),
                ColumnDef::new("ratio", ColumnType::Float64),
            ],
        )
        .unwrap()
    }

    fn feed(bound: &BoundAggregate, rows: &[Row]) -> AggregatePartial {
        let mut partial = bound.partial();
        for row in rows {
            bound.accumulate(&mut partial, |p| &row[p]);
        }
        partial
    }

    fn row(cents: i128, kind: &str, ratio: f64) -> Row {
        vec![Value::decimal(cents, 2), Value::from(kind), Value::Float64(ratio)]
    }

    #[test]
    fn test_global_aggregates() {
        let aggregate = Aggregate::new()
            .count()
            .sum("amount")
            .with(AggregateFunction::Avg("amount".into()))
            .with(AggregateFunction::Min("kind".into()))
            .with(AggregateFunction::Max("amount".into()))
            .with(AggregateFunction::CountColumn("ratio".into()));
        let bound = aggregate.bind(&schema()).unwrap();
        let rows = vec![
            row(500_000, "DEPOSIT", 0.5),
            row(-2_550, "WITHDRAWAL", 0.25),
            vec![Value::decimal(1, 2), Value::Null, Value::Null],
        ];
        let result = bound.finish(feed(&bound, &rows));

        assert_eq!(result.scalar("count(*)"), Some(&Value::Int64(3)));
        assert_eq!(result.scalar("sum(amount)"), Some(&Value::decimal(497_451, 2)));
        assert_eq!(result.scalar("min(kind)"), Some(&Value::from("DEPOSIT")));
        assert_eq!(result.scalar("max(amount)"), Some(&Value::decimal(500_000, 2)));
        assert_eq!(result.scalar("count(ratio)"), Some(&Value::Int64(2)));
        match result.scalar("avg(amount)") {
            Some(Value::Float64(avg)) => assert!((avg - 1658.17).abs() < 1e-9),
            other => panic!("unexpected avg {:?}", other),
        }
    }

    #[test]
    fn test_empty_input() {
        let bound = Aggregate::new().count().sum("amount").bind(&schema()).unwrap();
        let result = bound.finish(bound.partial());
        assert_eq!(result.rows, vec![vec![Value::Int64(0), Value::Null]]);

        let grouped = Aggregate::new().count().group_by("kind").bind(&schema()).unwrap();
        assert!(grouped.finish(grouped.partial()).rows.is_empty());
    }

    #[test]
    fn test_group_by() {
        let bound = Aggregate::new()
            .count()
            .sum("amount")
            .group_by("kind")
            .bind(&schema())
            .unwrap();
        let rows = vec![
            row(100, "DEPOSIT", 0.0),
            row(200, "WITHDRAWAL", 0.0),
            row(300, "DEPOSIT", 0.0),
        ];
        let result = bound.finish(feed(&bound, &rows));
        assert_eq!(result.rows.len(), 2);
        assert_eq!(
            result.group(&[Value::from("DEPOSIT")]),
            Some(&vec![Value::from("DEPOSIT"), Value::Int64(2), Value::decimal(400, 2)])
        );
    }

    #[test]
    fn test_fold_order_is_fixed() {
        let bound = Aggregate::new()
            .sum("ratio")
            .with(AggregateFunction::Percentile("ratio".into(), 0.5))
            .bind(&schema())
            .unwrap();
        let parts: Vec<(ChunkId, AggregatePartial)> = (0..8u64)
            .map(|i| {
                let rows: Vec<Row> = (0..10)
                    .map(|j| row(0, "x", 0.1 * f64::from(j) + 1e-7 * i as f64))
                    .collect();
                (
                    ChunkId::new(TableId::new(1), tandem_common::types::SeqNo::new(i * 10 + 1)),
                    feed(&bound, &rows),
                )
            })
            .collect();
        let mut reversed = parts.clone();
        reversed.reverse();
        assert_eq!(
            bound.finish(fold_partials(&bound, parts)),
            bound.finish(fold_partials(&bound, reversed))
        );
    }

    #[test]
    fn test_bind_errors() {
        assert!(Aggregate::new().sum("kind").bind(&schema()).is_err());
        assert!(Aggregate::new().sum("missing").bind(&schema()).is_err());
        assert!(Aggregate::new().bind(&schema()).is_err());
        let bad_q = Aggregate::new().with(AggregateFunction::Percentile("amount".into(), 1.5));
        assert!(matches!(
            bad_q.bind(&schema()),
            Err(TandemError::UnsupportedQueryShape { .. })
        ));
    }
}
