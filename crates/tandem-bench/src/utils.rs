//! Benchmark data generators.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tandem_common::types::{ColumnDef, ColumnType, Row, Value};

const KINDS: [&str; 4] = ["DEPOSIT", "WITHDRAWAL", "TRANSFER", "FEE"];

/// Columns of the `accounts` table used by every benchmark.
#[must_use]
pub fn account_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
        ColumnDef::new("kind", ColumnType::Text),
        ColumnDef::new("branch", ColumnType::Int64),
    ]
}

/// Generates `count` account rows from a fixed seed.
#[must_use]
pub fn generate_account_rows(count: usize) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            vec![
                Value::decimal(rng.gen_range(1..1_000_000), 2),
                Value::text(KINDS[rng.gen_range(0..KINDS.len())]),
                Value::Int64(rng.gen_range(0..32)),
            ]
        })
        .collect()
}

/// Generates an integer column with runs of `run` equal values.
#[must_use]
pub fn generate_runs(count: usize, run: usize) -> Vec<Value> {
    (0..count).map(|i| Value::Int64((i / run.max(1)) as i64)).collect()
}

/// Generates a random integer column.
#[must_use]
pub fn generate_random_ints(count: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count).map(|_| Value::Int64(rng.gen())).collect()
}
