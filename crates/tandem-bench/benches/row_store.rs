//! Row store benchmarks for TandemDB.
//!
//! Benchmarks for:
//! - Puts of fresh rows and updates of existing rows
//! - Point reads of the latest version
//! - Range scans with a predicate

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tandem_bench::utils::{account_columns, generate_account_rows};
use tandem_common::config::{ChangeLogConfig, RowStoreConfig};
use tandem_common::types::{CompareOp, Predicate, RowId, TableId, TableSchema, TxnId, Value};
use tandem_log::ChangeLog;
use tandem_row::RowStore;

const TABLE: TableId = TableId::new(1);

fn store() -> RowStore {
    let log = Arc::new(ChangeLog::in_memory(ChangeLogConfig::default()));
    let store = RowStore::new(RowStoreConfig::default(), log);
    store
        .create_table(TableSchema::new(TABLE, "accounts", account_columns()).unwrap())
        .unwrap();
    store
}

fn loaded_store(count: usize) -> RowStore {
    let store = store();
    for (i, row) in generate_account_rows(count).into_iter().enumerate() {
        store.put(TABLE, RowId::new(i as u64 + 1), row, TxnId::new(1)).unwrap();
    }
    store
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("row/put");

    for size in [1_000, 10_000].iter() {
        let rows = generate_account_rows(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("insert", size), size, |b, _| {
            b.iter(|| {
                let store = store();
                for (i, row) in rows.iter().enumerate() {
                    store.put(TABLE, RowId::new(i as u64 + 1), row.clone(), TxnId::new(1)).unwrap();
                }
                black_box(store.stats())
            });
        });
        group.bench_with_input(BenchmarkId::new("update", size), size, |b, _| {
            let store = store();
            b.iter(|| {
                for row in &rows {
                    store.put(TABLE, RowId::new(1), row.clone(), TxnId::new(1)).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("row/get");
    let size = 10_000u64;
    let store = loaded_store(size as usize);

    group.throughput(Throughput::Elements(size));
    group.bench_function("latest", |b| {
        b.iter(|| {
            for i in 1..=size {
                black_box(store.get(TABLE, RowId::new(i)).unwrap());
            }
        });
    });

    group.finish();
}

fn bench_scan_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("row/scan_range");
    let store = loaded_store(10_000);
    let deposits = Predicate::compare("kind", CompareOp::Eq, Value::text("DEPOSIT"));

    for width in [100u64, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*width));
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, &width| {
            b.iter(|| black_box(store.scan_range(TABLE, RowId::new(1)..=RowId::new(width), &deposits).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_scan_range);
criterion_main!(benches);
