//! Synthetic mixed workload.
//!
//! Writers upsert and delete random rows of one table while readers mix
//! point lookups with grouped aggregates that tolerate bounded staleness.
//! Engine calls block, so every task runs on the blocking pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tandem_column::Aggregate;
use tandem_common::types::{ColumnDef, ColumnType, RowId, TableId, Value};
use tandem_common::TandemError;
use tandem_engine::{Engine, Query, Staleness};

use crate::config::WorkloadConfig;

const KINDS: [&str; 3] = ["DEPOSIT", "WITHDRAWAL", "TRANSFER"];

/// Workload counters.
#[derive(Debug, Default)]
pub struct WorkloadStats {
    /// Upserts committed.
    pub puts: AtomicU64,
    /// Deletes committed.
    pub deletes: AtomicU64,
    /// Point lookups run.
    pub lookups: AtomicU64,
    /// Aggregates run.
    pub aggregates: AtomicU64,
    /// Operations refused by admission control, cancelled or too stale.
    pub rejected: AtomicU64,
    /// Operations that failed otherwise.
    pub errors: AtomicU64,
}

impl WorkloadStats {
    /// Returns a copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> WorkloadStatsSnapshot {
        WorkloadStatsSnapshot {
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            aggregates: self.aggregates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn record<T>(&self, counter: &AtomicU64, result: Result<T, TandemError>) {
        match result {
            Ok(_) | Err(TandemError::NotFound { .. }) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(TandemError::Rejected { .. })
            | Err(TandemError::Cancelled)
            | Err(TandemError::StaleData { .. }) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Workload operation failed");
            }
        }
    }
}

/// Copy of [`WorkloadStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadStatsSnapshot {
    /// Upserts committed.
    pub puts: u64,
    /// Deletes committed.
    pub deletes: u64,
    /// Point lookups run.
    pub lookups: u64,
    /// Aggregates run.
    pub aggregates: u64,
    /// Operations refused by admission control, cancelled or too stale.
    pub rejected: u64,
    /// Operations that failed otherwise.
    pub errors: u64,
}

/// A running workload.
pub struct Workload {
    table_id: TableId,
    stop: Arc<AtomicBool>,
    stats: Arc<WorkloadStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl Workload {
    /// Creates the workload table if needed and starts the tasks.
    pub fn start(engine: Arc<Engine>, config: WorkloadConfig) -> Result<Self> {
        let table_id = match engine.table_id(&config.table) {
            Ok(id) => id,
            Err(TandemError::TableNotFound { .. }) => engine.create_table(
                &config.table,
                vec![
                    ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
                    ColumnDef::new("kind", ColumnType::Text),
                ],
            )?,
            Err(err) => return Err(err.into()),
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkloadStats::default());
        let config = Arc::new(config);
        let mut tasks = Vec::with_capacity(config.writers + config.readers);
        for i in 0..config.writers {
            let (engine, config, stop, stats) =
                (Arc::clone(&engine), Arc::clone(&config), Arc::clone(&stop), Arc::clone(&stats));
            tasks.push(tokio::task::spawn_blocking(move || {
                write_loop(&engine, table_id, &config, i as u64, &stop, &stats)
            }));
        }
        for i in 0..config.readers {
            let (engine, config, stop, stats) =
                (Arc::clone(&engine), Arc::clone(&config), Arc::clone(&stop), Arc::clone(&stats));
            tasks.push(tokio::task::spawn_blocking(move || {
                read_loop(&engine, table_id, &config, i as u64, &stop, &stats)
            }));
        }
        info!(
            table = %config.table,
            writers = config.writers,
            readers = config.readers,
            key_space = config.key_space,
            "Started synthetic workload"
        );
        Ok(Self {
            table_id,
            stop,
            stats,
            tasks,
        })
    }

    /// Table the workload writes.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the counters.
    #[must_use]
    pub fn stats(&self) -> WorkloadStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops every task and waits for them.
    pub async fn stop(self) -> WorkloadStatsSnapshot {
        self.stop.store(true, Ordering::Release);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Workload task panicked");
            }
        }
        let stats = self.stats.snapshot();
        info!(puts = stats.puts, deletes = stats.deletes, aggregates = stats.aggregates, "Stopped synthetic workload");
        stats
    }
}

fn write_loop(
    engine: &Engine,
    table_id: TableId,
    config: &WorkloadConfig,
    task: u64,
    stop: &AtomicBool,
    stats: &WorkloadStats,
) {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(task));
    let pause = Duration::from_millis(config.pause_ms);
    while !stop.load(Ordering::Acquire) {
        let row_id = RowId::new(rng.gen_range(1..=config.key_space));
        let txn = engine.begin_txn();
        if rng.gen_range(0..100) < config.delete_percent {
            stats.record(&stats.deletes, engine.delete(table_id, row_id, txn));
        } else {
            let values = vec![
                Value::decimal(rng.gen_range(1..100_000), 2),
                Value::text(KINDS[rng.gen_range(0..KINDS.len())]),
            ];
            stats.record(&stats.puts, engine.put(table_id, row_id, values, txn));
        }
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
    debug!(task, "Writer stopped");
}

fn read_loop(
    engine: &Engine,
    table_id: TableId,
    config: &WorkloadConfig,
    task: u64,
    stop: &AtomicBool,
    stats: &WorkloadStats,
) {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1_000 + task));
    let pause = Duration::from_millis(config.pause_ms.max(1));
    let aggregate = Query::aggregate(table_id, Aggregate::new().group_by("kind").count().sum("amount"))
        .with_staleness(Staleness::MaxLag(config.max_lag));
    let mut round = 0u64;
    while !stop.load(Ordering::Acquire) {
        round += 1;
        if round % 16 == 0 {
            stats.record(&stats.aggregates, engine.query(&aggregate));
        } else {
            let row_id = RowId::new(rng.gen_range(1..=config.key_space));
            stats.record(&stats.lookups, engine.get(table_id, row_id));
        }
        std::thread::sleep(pause);
    }
    debug!(task, "Reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::config::EngineConfig;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workload_runs_and_stops() {
        let engine = Arc::new(Engine::open(EngineConfig::for_testing()).unwrap());
        let config = WorkloadConfig {
            enabled: true,
            writers: 2,
            readers: 1,
            key_space: 50,
            ..Default::default()
        };
        let workload = Workload::start(Arc::clone(&engine), config).unwrap();
        let table = workload.table_id();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = workload.stop().await;

        assert!(stats.puts > 0);
        assert!(stats.lookups > 0);
        assert_eq!(stats.errors, 0);

        let latest = engine.sync_now().unwrap();
        let count = engine
            .query(&Query::aggregate(table, Aggregate::new().count()).with_staleness(Staleness::AtLeast(latest)))
            .unwrap();
        let live = (1..=50)
            .filter(|i| engine.get(table, RowId::new(*i)).is_ok())
            .count() as i64;
        assert_eq!(count.aggregate().unwrap().scalar("count(*)"), Some(&Value::Int64(live)));
    }

    #[tokio::test]
    async fn test_existing_table_is_reused() {
        let engine = Arc::new(Engine::open_manual(EngineConfig::for_testing()).unwrap());
        let existing = engine
            .create_table("workload", vec![ColumnDef::new("amount", ColumnType::Decimal { scale: 2 })])
            .unwrap();
        let config = WorkloadConfig {
            writers: 0,
            readers: 0,
            ..Default::default()
        };
        let workload = Workload::start(engine, config).unwrap();
        assert_eq!(workload.table_id(), existing);
        assert_eq!(workload.stop().await, WorkloadStatsSnapshot::default());
    }
}
