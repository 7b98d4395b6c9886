//! Shared fixtures for the integration tests.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tandem_common::config::EngineConfig;
use tandem_common::types::{ColumnDef, ColumnType, Row, RowId, TableId, Value};
use tandem_engine::Engine;

/// Name of the accounts table.
pub const ACCOUNTS: &str = "accounts";

/// Columns of the accounts table: `amount DECIMAL(2)`, `type TEXT`.
#[must_use]
pub fn account_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
        ColumnDef::new("type", ColumnType::Text),
    ]
}

/// An account row with `cents` in the amount column.
#[must_use]
pub fn account_row(cents: i128, kind: &str) -> Row {
    vec![Value::decimal(cents, 2), Value::text(kind)]
}

/// Opens `config` without the background synchronizer and creates the accounts table.
pub fn manual_engine(config: EngineConfig) -> (Engine, TableId) {
    let engine = Engine::open_manual(config).expect("open engine");
    let table = match engine.table_id(ACCOUNTS) {
        Ok(table) => table,
        Err(_) => engine
            .create_table(ACCOUNTS, account_columns())
            .expect("create accounts"),
    };
    (engine, table)
}

/// Writes `count` accounts with seeded random amounts and returns the total in cents.
pub fn load_accounts(engine: &Engine, table: TableId, count: u64, seed: u64) -> i128 {
    let mut rng = StdRng::seed_from_u64(seed);
    let kinds = ["DEPOSIT", "WITHDRAWAL"];
    let mut total = 0;
    for i in 1..=count {
        let cents = rng.gen_range(1..1_000_000i128);
        total += cents;
        engine
            .put(
                table,
                RowId::new(i),
                account_row(cents, kinds[rng.gen_range(0..kinds.len())]),
                engine.begin_txn(),
            )
            .expect("put");
    }
    total
}

/// Returns the newest change log segment file under an engine data directory.
pub fn newest_segment(data_dir: &Path) -> Option<PathBuf> {
    let dir = data_dir.join(tandem_engine::LOG_DIR);
    let mut segments: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "log"))
        .collect();
    segments.sort();
    segments.pop()
}
