//! Columnar store benchmarks for TandemDB.
//!
//! Benchmarks for:
//! - Encoding a column chunk with each encoding
//! - Building chunk groups from batches
//! - Filtered and aggregate scans

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tandem_bench::utils::{account_columns, generate_account_rows, generate_random_ints, generate_runs};
use tandem_column::{Aggregate, ColumnChunk, ColumnStore, Encoding, GroupRow, ScanRequest};
use tandem_common::config::ColumnStoreConfig;
use tandem_common::types::{ColumnType, CompareOp, Predicate, RowId, SeqNo, TableId, TableSchema, Value};

const TABLE: TableId = TableId::new(1);
const GROUP_ROWS: usize = 4_096;

fn group_rows(first: u64, count: usize) -> Vec<GroupRow> {
    generate_account_rows(count)
        .into_iter()
        .enumerate()
        .map(|(i, values)| GroupRow {
            row_id: RowId::new(first + i as u64),
            seq: SeqNo::new(first + i as u64),
            values: Arc::new(values),
        })
        .collect()
}

fn loaded_store(groups: usize) -> ColumnStore {
    let store = ColumnStore::new(ColumnStoreConfig::default(), SeqNo::ZERO);
    store
        .create_table(Arc::new(TableSchema::new(TABLE, "accounts", account_columns()).unwrap()))
        .unwrap();
    for g in 0..groups {
        let first = (g * GROUP_ROWS) as u64 + 1;
        let last = first + GROUP_ROWS as u64 - 1;
        let rows = group_rows(first, GROUP_ROWS);
        let group = store
            .build_group(TABLE, SeqNo::new(first), SeqNo::new(last), &rows, Vec::new())
            .unwrap();
        store.publish(group).unwrap();
        store.advance_watermark(SeqNo::new(last));
    }
    store
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("column/encode");
    let inputs = [("runs", generate_runs(GROUP_ROWS, 64)), ("random", generate_random_ints(GROUP_ROWS))];

    group.throughput(Throughput::Elements(GROUP_ROWS as u64));
    for (name, values) in &inputs {
        for encoding in [Encoding::Plain, Encoding::Dictionary, Encoding::RunLength, Encoding::Delta] {
            group.bench_with_input(BenchmarkId::new(*name, format!("{:?}", encoding)), values, |b, values| {
                b.iter(|| black_box(ColumnChunk::with_encoding(ColumnType::Int64, encoding, values).unwrap()));
            });
        }
        group.bench_with_input(BenchmarkId::new(*name, "chosen"), values, |b, values| {
            let config = ColumnStoreConfig::default();
            b.iter(|| black_box(ColumnChunk::encode(ColumnType::Int64, values, &config).unwrap()));
        });
    }

    group.finish();
}

fn bench_build_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("column/build_group");
    let store = loaded_store(0);
    let rows = group_rows(1, GROUP_ROWS);

    group.throughput(Throughput::Elements(GROUP_ROWS as u64));
    group.bench_function("accounts", |b| {
        b.iter(|| {
            black_box(
                store
                    .build_group(TABLE, SeqNo::new(1), SeqNo::new(GROUP_ROWS as u64), &rows, Vec::new())
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("column/scan");
    let groups = 16;
    let store = loaded_store(groups);
    let total = (groups * GROUP_ROWS) as u64;

    let filtered = ScanRequest::new(SeqNo::ZERO)
        .with_columns(["amount"])
        .with_predicate(Predicate::compare("kind", CompareOp::Eq, Value::text("FEE")));
    let grouped = ScanRequest::new(SeqNo::ZERO)
        .with_aggregate(Aggregate::new().group_by("kind").count().sum("amount"));
    let pruned = ScanRequest::new(SeqNo::ZERO)
        .with_predicate(Predicate::compare("_row_id", CompareOp::LtEq, Value::Int64(GROUP_ROWS as i64)))
        .with_aggregate(Aggregate::new().count());

    group.throughput(Throughput::Elements(total));
    for (name, request) in [("filter", &filtered), ("group_by", &grouped), ("zone_pruned", &pruned)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| black_box(store.scan(TABLE, request).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_build_group, bench_scan);
criterion_main!(benches);
