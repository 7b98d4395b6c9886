//! Vectorized scans over chunk groups.
//!
//! A scan visits the groups of one table version in chunk-id order. Each
//! group is first checked against the predicate's zone maps; surviving
//! groups decode only the columns the scan needs, evaluate the predicate
//! column-at-a-time into a selection bitmap, clear superseded rows with the
//! group's delete vector, and then project or aggregate the selected rows.

use std::collections::HashMap;

use bitvec::prelude::*;

use tandem_common::types::{BoundPredicate, Predicate, Row, RowId, SeqNo, TableSchema, Value};
use tandem_common::{TandemError, TandemResult};

use crate::aggregate::{fold_partials, Aggregate, AggregatePartial, AggregateResult, BoundAggregate};
use crate::chunk::ZoneMap;
use crate::delete::DeleteVector;
use crate::group::ChunkGroup;

/// Cooperative hook called between chunk groups.
///
/// Returning an error (normally `Cancelled`) stops the scan; no partial
/// result escapes.
pub trait ScanYield {
    /// Called before each chunk group.
    fn checkpoint(&self) -> TandemResult<()>;
}

impl<F> ScanYield for F
where
    F: Fn() -> TandemResult<()>,
{
    fn checkpoint(&self) -> TandemResult<()> {
        self()
    }
}

/// A columnar scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Columns to return; empty means all. Ignored for aggregates.
    pub columns: Vec<String>,
    /// Row filter.
    pub predicate: Predicate,
    /// Lowest watermark the result may be computed against.
    pub time_bound: SeqNo,
    /// Aggregate to compute instead of returning rows.
    pub aggregate: Option<Aggregate>,
}

impl ScanRequest {
    /// Creates a scan of all columns that needs the watermark at `time_bound` or later.
    #[must_use]
    pub fn new(time_bound: SeqNo) -> Self {
        Self {
            columns: Vec::new(),
            predicate: Predicate::True,
            time_bound,
            aggregate: None,
        }
    }

    /// Restricts the returned columns.
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the row filter.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Computes `aggregate` instead of returning rows.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }
}

/// One row returned by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    /// Row key.
    pub row_id: RowId,
    /// Sequence number of the row image.
    pub seq: SeqNo,
    /// Projected values.
    pub values: Row,
}

/// Rows or an aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutput {
    /// Filtered rows, in chunk-id then storage order.
    Rows(Vec<ScanRow>),
    /// Aggregate result.
    Aggregate(AggregateResult),
}

/// Result of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Rows or aggregate.
    pub output: ScanOutput,
    /// Watermark the scan was computed against.
    pub watermark: SeqNo,
    /// Groups read.
    pub groups_scanned: usize,
    /// Groups skipped by zone maps.
    pub groups_pruned: usize,
}

impl ScanResult {
    /// Returns the rows of a row scan.
    #[must_use]
    pub fn rows(&self) -> Option<&[ScanRow]> {
        match &self.output {
            ScanOutput::Rows(rows) => Some(rows),
            ScanOutput::Aggregate(_) => None,
        }
    }

    /// Returns the result of an aggregate scan.
    #[must_use]
    pub fn aggregate(&self) -> Option<&AggregateResult> {
        match &self.output {
            ScanOutput::Aggregate(result) => Some(result),
            ScanOutput::Rows(_) => None,
        }
    }
}

/// A scan resolved against a schema.
pub(crate) struct ScanPlan {
    predicate: BoundPredicate,
    projection: Vec<usize>,
    aggregate: Option<BoundAggregate>,
    arity: usize,
}

impl ScanPlan {
    pub(crate) fn bind(schema: &TableSchema, request: &ScanRequest) -> TandemResult<Self> {
        let predicate = request.predicate.bind(schema)?;
        let aggregate = request
            .aggregate
            .as_ref()
            .map(|a| a.bind(schema))
            .transpose()?;
        let projection = if request.columns.is_empty() {
            (0..schema.arity()).collect()
        } else {
            request
                .columns
                .iter()
                .map(|name| {
                    schema.column_index(name).ok_or_else(|| {
                        TandemError::schema_mismatch(format!(
                            "unknown column '{}' in table '{}'",
                            name, schema.name
                        ))
                    })
                })
                .collect::<TandemResult<Vec<_>>>()?
        };
        Ok(Self {
            predicate,
            projection,
            aggregate,
            arity: schema.arity(),
        })
    }

    fn needed_columns(&self) -> Vec<usize> {
        let mut needed: Vec<usize> = self
            .predicate
            .column_positions()
            .into_iter()
            .filter(|p| *p < self.arity)
            .collect();
        match &self.aggregate {
            Some(aggregate) => needed.extend(aggregate.column_positions()),
            None => needed.extend(self.projection.iter().copied()),
        }
        needed.sort_unstable();
        needed.dedup();
        needed
    }

    /// Runs the plan over `groups`, which must be in chunk-id order.
    pub(crate) fn execute(
        &self,
        groups: &[(&ChunkGroup, &DeleteVector)],
        hook: &dyn ScanYield,
    ) -> TandemResult<(ScanOutput, usize, usize)> {
        let needed = self.needed_columns();
        let mut rows = Vec::new();
        let mut partials = Vec::new();
        let mut scanned = 0;
        let mut pruned = 0;

        for (group, deletes) in groups {
            hook.checkpoint()?;
            if deletes.live_count() == 0 || !self.may_match(&self.predicate, group) {
                pruned += 1;
                continue;
            }
            scanned += 1;

            let batch = ColumnBatch::load(group, &needed, self.arity)?;
            let mut selection = evaluate(&self.predicate, &batch);
            deletes.apply_to(&mut selection);

            match &self.aggregate {
                Some(aggregate) => {
                    let mut partial = aggregate.partial();
                    for offset in selection.iter_ones() {
                        aggregate.accumulate(&mut partial, |p| batch.value(p, offset));
                    }
                    partials.push((group.id(), partial));
                }
                None => {
                    for offset in selection.iter_ones() {
                        rows.push(ScanRow {
                            row_id: group.row_ids()[offset],
                            seq: group.seqs()[offset],
                            values: self
                                .projection
                                .iter()
                                .map(|p| batch.value(*p, offset).clone())
                                .collect(),
                        });
                    }
                }
            }
        }

        let output = match &self.aggregate {
            Some(aggregate) => {
                let merged: AggregatePartial = fold_partials(aggregate, partials);
                ScanOutput::Aggregate(aggregate.finish(merged))
            }
            None => ScanOutput::Rows(rows),
        };
        Ok((output, scanned, pruned))
    }

    fn zone(&self, group: &ChunkGroup, column: usize) -> Option<ZoneMap> {
        if column < self.arity {
            group.column(column).map(|c| c.zone().clone())
        } else if column == self.arity {
            Some(group.row_id_zone())
        } else {
            Some(group.seq_zone())
        }
    }

    fn may_match(&self, predicate: &BoundPredicate, group: &ChunkGroup) -> bool {
        match predicate {
            BoundPredicate::True | BoundPredicate::Not(_) => true,
            BoundPredicate::Compare { column, op, value } => self
                .zone(group, *column)
                .map_or(true, |zone| zone.may_match(*op, value)),
            BoundPredicate::IsNull(column) => self
                .zone(group, *column)
                .map_or(true, |zone| zone.may_have_nulls()),
            BoundPredicate::IsNotNull(column) => self
                .zone(group, *column)
                .map_or(true, |zone| zone.may_have_values()),
            BoundPredicate::And(children) => children.iter().all(|c| self.may_match(c, group)),
            BoundPredicate::Or(children) => children.iter().any(|c| self.may_match(c, group)),
        }
    }
}

/// Decoded columns of one group, by position.
struct ColumnBatch {
    rows: usize,
    columns: HashMap<usize, Vec<Value>>,
}

static NULL: Value = Value::Null;

impl ColumnBatch {
    fn load(group: &ChunkGroup, positions: &[usize], arity: usize) -> TandemResult<Self> {
        let mut columns = HashMap::with_capacity(positions.len() + 2);
        for &position in positions {
            columns.insert(position, group.decode_column(position)?);
        }
        columns.insert(
            arity,
            group
                .row_ids()
                .iter()
                .map(|id| Value::unsigned(id.as_u64()))
                .collect(),
        );
        columns.insert(
            arity + 1,
            group
                .seqs()
                .iter()
                .map(|s| Value::unsigned(s.as_u64()))
                .collect(),
        );
        Ok(Self {
            rows: group.row_count(),
            columns,
        })
    }

    fn column(&self, position: usize) -> Option<&[Value]> {
        self.columns.get(&position).map(Vec::as_slice)
    }

    fn value(&self, position: usize, offset: usize) -> &Value {
        self.column(position)
            .and_then(|c| c.get(offset))
            .unwrap_or(&NULL)
    }
}

fn evaluate(predicate: &BoundPredicate, batch: &ColumnBatch) -> BitVec {
    match predicate {
        BoundPredicate::True => bitvec![1; batch.rows],
        BoundPredicate::Compare { column, op, value } => match batch.column(*column) {
            Some(values) => values
                .iter()
                .map(|v| BoundPredicate::compare_value(*op, v, value))
                .collect(),
            None => bitvec![0; batch.rows],
        },
        BoundPredicate::IsNull(column) => match batch.column(*column) {
            Some(values) => values.iter().map(Value::is_null).collect(),
            None => bitvec![1; batch.rows],
        },
        BoundPredicate::IsNotNull(column) => match batch.column(*column) {
            Some(values) => values.iter().map(|v| !v.is_null()).collect(),
            None => bitvec![0; batch.rows],
        },
        BoundPredicate::And(children) => {
            let mut selection = bitvec![1; batch.rows];
            for child in children {
                selection &= evaluate(child, batch).as_bitslice();
            }
            selection
        }
        BoundPredicate::Or(children) => {
            let mut selection = bitvec![0; batch.rows];
            for child in children {
                selection |= evaluate(child, batch).as_bitslice();
            }
            selection
        }
        BoundPredicate::Not(inner) => !evaluate(inner, batch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tandem_common::config::ColumnStoreConfig;
    use tandem_common::types::{ChunkId, ColumnDef, ColumnType, CompareOp, TableId};

    use crate::group::GroupRow;

    fn schema() -> TableSchema {
        TableSchema::new(
            TableId::new(1),
            "events",
            vec![
                ColumnDef::new("value", ColumnType::Int64),
                ColumnDef::new("tag", ColumnType::Text),
            ],
        )
        .unwrap()
    }

    fn group(first: u64, n: u64) -> ChunkGroup {
        let rows: Vec<GroupRow> = (0..n)
            .map(|i| GroupRow {
                row_id: RowId::new(first + i),
                seq: SeqNo::new(first + i),
                values: Arc::new(vec![
                    Value::Int64((first + i) as i64),
                    if i % 4 == 0 { Value::Null } else { Value::from("t") },
                ]),
            })
            .collect();
        ChunkGroup::build(
            ChunkId::new(TableId::new(1), SeqNo::new(first)),
            &schema(),
            SeqNo::new(first + n - 1),
            &rows,
            Vec::new(),
            &ColumnStoreConfig::default(),
        )
        .unwrap()
    }

    fn no_yield() -> TandemResult<()> {
        Ok(())
    }

    #[test]
    fn test_zone_map_prunes_groups() {
        let a = group(1, 10);
        let b = group(11, 10);
        let (da, db) = (DeleteVector::new(10), DeleteVector::new(10));
        let request = ScanRequest::new(SeqNo::ZERO)
            .with_predicate(Predicate::compare("value", CompareOp::GtEq, Value::Int64(15)));
        let plan = ScanPlan::bind(&schema(), &request).unwrap();
        let (output, scanned, pruned) = plan.execute(&[(&a, &da), (&b, &db)], &no_yield).unwrap();
        assert_eq!((scanned, pruned), (1, 1));
        match output {
            ScanOutput::Rows(rows) => {
                assert_eq!(rows.len(), 6);
                assert_eq!(rows[0].row_id, RowId::new(15));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pseudo_columns_and_nulls() {
        let a = group(1, 8);
        let mut deletes = DeleteVector::new(8);
        deletes.mark(1);
        let request = ScanRequest::new(SeqNo::ZERO)
            .with_columns(["tag"])
            .with_predicate(
                Predicate::compare("_row_id", CompareOp::Lt, Value::Int64(5))
                    .and(Predicate::IsNotNull("tag".into())),
            );
        let plan = ScanPlan::bind(&schema(), &request).unwrap();
        let (output, _, _) = plan.execute(&[(&a, &deletes)], &no_yield).unwrap();
        let ScanOutput::Rows(rows) = output else {
            panic!("expected rows");
        };
        // Row 1 (offset 0) has a NULL tag, row 2 is deleted.
        let ids: Vec<u64> = rows.iter().map(|r| r.row_id.as_u64()).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(rows[0].values, vec![Value::from("t")]);
    }

    #[test]
    fn test_not_predicate() {
        let a = group(1, 4);
        let deletes = DeleteVector::new(4);
        let request = ScanRequest::new(SeqNo::ZERO).with_predicate(Predicate::Not(Box::new(
            Predicate::eq("value", Value::Int64(2)),
        )));
        let plan = ScanPlan::bind(&schema(), &request).unwrap();
        let (output, _, _) = plan.execute(&[(&a, &deletes)], &no_yield).unwrap();
        assert_eq!(output_len(&output), 3);
    }

    fn output_len(output: &ScanOutput) -> usize {
        match output {
            ScanOutput::Rows(rows) => rows.len(),
            ScanOutput::Aggregate(result) => result.rows.len(),
        }
    }

    #[test]
    fn test_cancellation_between_groups() {
        let a = group(1, 4);
        let b = group(5, 4);
        let deletes = DeleteVector::new(4);
        let calls = std::cell::Cell::new(0);
        let hook = || {
            calls.set(calls.get() + 1);
            if calls.get() > 1 {
                Err(TandemError::Cancelled)
            } else {
                Ok(())
            }
        };
        let request = ScanRequest::new(SeqNo::ZERO).with_aggregate(Aggregate::new().count());
        let plan = ScanPlan::bind(&schema(), &request).unwrap();
        let err = plan
            .execute(&[(&a, &deletes), (&b, &deletes)], &hook)
            .unwrap_err();
        assert!(matches!(err, TandemError::Cancelled));
    }
}
