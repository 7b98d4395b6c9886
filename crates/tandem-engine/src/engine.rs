//! Main engine.
//!
//! The `Engine` struct is the top-level entry point for TandemDB. It owns the
//! change log, both stores, the synchronizer and its worker, the router and
//! the governor, and exposes the ingestion, query and observability
//! boundaries.
//!
//! Recovery restores the row snapshot when the data directory has one,
//! replays the change log entries after it and rebuilds the columnar store
//! from the recovered rows. Without a snapshot the retained log is replayed
//! into both stores.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tandem_column::{AggregateResult, ColumnStore, ColumnStoreStatsSnapshot, ScanOutput, ScanRequest, ScanRow};
use tandem_common::config::EngineConfig;
use tandem_common::constants::ROW_ID_COLUMN;
use tandem_common::types::{
    ColumnDef, CompareOp, Predicate, Row, RowId, SeqNo, TableId, TableSchema, TxnId, Value,
};
use tandem_common::{TandemError, TandemResult};
use tandem_log::{ChangeLog, LogStatsSnapshot};
use tandem_row::{Record, RowStore, RowStoreStatsSnapshot};
use tandem_sync::{SyncStatsSnapshot, SyncWorker, Synchronizer};

use crate::catalog::Catalog;
use crate::checkpoint::{seed_columns, CheckpointWorker, Checkpointer, Snapshot};
use crate::governor::{GovernorStatsSnapshot, ResourceGovernor, WorkloadClass};
use crate::router::{Query, QueryRouter, QueryTarget, Route, RouterStatsSnapshot};

/// Subdirectory of the data directory holding change log segments.
pub const LOG_DIR: &str = "log";

/// What a query produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Row store records, ordered by row id, projected when columns were given.
    Records(Vec<Record>),
    /// Columnar rows in chunk order.
    Rows(Vec<ScanRow>),
    /// Columnar aggregate.
    Aggregate(AggregateResult),
}

/// Result of [`Engine::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Store the query ran on.
    pub route: Route,
    /// Sequence number the result reflects: the last committed one for row
    /// store reads, the watermark for columnar reads.
    pub as_of: SeqNo,
    /// Payload.
    pub output: QueryOutput,
}

impl QueryResult {
    /// Returns the records of a row store read.
    #[must_use]
    pub fn records(&self) -> Option<&[Record]> {
        match &self.output {
            QueryOutput::Records(records) => Some(records),
            _ => None,
        }
    }

    /// Returns the rows of a columnar scan.
    #[must_use]
    pub fn rows(&self) -> Option<&[ScanRow]> {
        match &self.output {
            QueryOutput::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Returns the aggregate of a columnar scan.
    #[must_use]
    pub fn aggregate(&self) -> Option<&AggregateResult> {
        match &self.output {
            QueryOutput::Aggregate(result) => Some(result),
            _ => None,
        }
    }

    /// Number of records or rows returned.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.output {
            QueryOutput::Records(records) => records.len(),
            QueryOutput::Rows(rows) => rows.len(),
            QueryOutput::Aggregate(result) => result.rows.len(),
        }
    }

    /// Returns true if nothing was returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Engine-wide observability snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    /// Columnar watermark.
    pub watermark: SeqNo,
    /// Last committed sequence number.
    pub last_committed: SeqNo,
    /// `last_committed - watermark`.
    pub lag: u64,
    /// Registered tables.
    pub tables: usize,
    /// Change log entries still retained.
    pub retained_entries: usize,
    /// Time since open.
    pub uptime: Duration,
    /// Row store counters.
    pub rows: RowStoreStatsSnapshot,
    /// Change log counters.
    pub log: LogStatsSnapshot,
    /// Columnar store counters and compression.
    pub columns: ColumnStoreStatsSnapshot,
    /// Synchronizer state.
    pub sync: SyncStatsSnapshot,
    /// Governor state.
    pub governor: GovernorStatsSnapshot,
    /// Routing counters.
    pub router: RouterStatsSnapshot,
}

/// The TandemDB engine.
pub struct Engine {
    config: EngineConfig,
    log: Arc<ChangeLog>,
    catalog: Catalog,
    rows: Arc<RowStore>,
    columns: Arc<ColumnStore>,
    sync: Arc<Synchronizer>,
    worker: Mutex<Option<SyncWorker>>,
    checkpointer: Option<Arc<Checkpointer>>,
    checkpoint_worker: Mutex<Option<CheckpointWorker>>,
    router: QueryRouter,
    governor: ResourceGovernor,
    next_txn: AtomicU64,
    closed: AtomicBool,
    started_at: Instant,
}

impl Engine {
    /// Opens an engine and starts the background synchronizer.
    pub fn open(config: EngineConfig) -> TandemResult<Self> {
        Self::open_with(config, true)
    }

    /// Opens an engine without the background synchronizer.
    ///
    /// Columnar data then only moves on [`Engine::sync_now`].
    pub fn open_manual(config: EngineConfig) -> TandemResult<Self> {
        Self::open_with(config, false)
    }

    fn open_with(config: EngineConfig, background_sync: bool) -> TandemResult<Self> {
        config.validate().map_err(TandemError::config)?;

        let (log, catalog) = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (
                    ChangeLog::open(&dir.join(LOG_DIR), config.change_log.clone())?,
                    Catalog::open(dir)?,
                )
            }
            None => (
                ChangeLog::in_memory(config.change_log.clone()),
                Catalog::in_memory(),
            ),
        };
        let snapshot = match &config.data_dir {
            Some(dir) => Snapshot::load(dir)?,
            None => None,
        };
        let log = Arc::new(log);
        let rows = Arc::new(RowStore::new(config.row_store.clone(), Arc::clone(&log)));
        let initial_watermark = match &snapshot {
            Some(_) => SeqNo::ZERO,
            None => log.first_retained().prev(),
        };
        let columns = Arc::new(ColumnStore::new(config.column_store.clone(), initial_watermark));
        for schema in catalog.tables() {
            rows.create_table(schema.as_ref().clone())?;
            columns.create_table(schema)?;
        }

        let (replayed, max_txn) = match &snapshot {
            Some(snapshot) => {
                let restored_txn = Self::restore(&log, &rows, snapshot)?;
                let (replayed, max_txn) = Self::recover(&log, &rows, snapshot.seq.next())?;
                let groups = seed_columns(&rows, &columns, log.last_committed(), config.sync.batch_max_rows)?;
                info!(
                    snapshot = %snapshot.seq,
                    replayed,
                    groups,
                    watermark = %columns.watermark(),
                    "Rebuilt columnar store from recovered rows"
                );
                (0, max_txn.max(restored_txn))
            }
            None => Self::recover(&log, &rows, log.first_retained())?,
        };
        let sync = Arc::new(Synchronizer::new(
            config.sync.clone(),
            Arc::clone(&log),
            Arc::clone(&columns),
        )?);
        if replayed > 0 {
            let watermark = sync.flush()?;
            info!(replayed, watermark = %watermark, "Rebuilt columnar store from change log");
        }
        let worker = if background_sync {
            Some(SyncWorker::spawn(Arc::clone(&sync))?)
        } else {
            None
        };

        let checkpointer = config.data_dir.as_ref().map(|dir| {
            Arc::new(Checkpointer::new(
                dir.clone(),
                Arc::clone(&log),
                Arc::clone(&rows),
                Arc::clone(&columns),
            ))
        });
        let interval = config.change_log.checkpoint_interval();
        let checkpoint_worker = match &checkpointer {
            Some(checkpointer)
                if background_sync && config.change_log.purge_segments && !interval.is_zero() =>
            {
                Some(CheckpointWorker::spawn(Arc::clone(checkpointer), interval)?)
            }
            _ => None,
        };

        info!(
            data_dir = ?config.data_dir,
            tables = catalog.tables().len(),
            last_committed = %log.last_committed(),
            background_sync,
            "Engine opened"
        );
        Ok(Self {
            router: QueryRouter::new(config.router.clone()),
            governor: ResourceGovernor::new(config.governor.clone()),
            config,
            log,
            catalog,
            rows,
            columns,
            sync,
            worker: Mutex::new(worker),
            checkpointer,
            checkpoint_worker: Mutex::new(checkpoint_worker),
            next_txn: AtomicU64::new(max_txn + 1),
            closed: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    /// Installs a row snapshot and positions the log after it.
    fn restore(log: &ChangeLog, rows: &RowStore, snapshot: &Snapshot) -> TandemResult<u64> {
        if log.first_retained() > snapshot.seq.next() {
            return Err(TandemError::corruption(format!(
                "change log resumes at {} but the row snapshot ends at {}",
                log.first_retained(),
                snapshot.seq
            )));
        }
        log.resume_after(snapshot.seq);
        log.mark_checkpoint(snapshot.seq);
        let max_txn = snapshot.restore(rows)?;
        info!(snapshot = %snapshot.seq, rows = snapshot.entries.len(), "Restored row snapshot");
        Ok(max_txn)
    }

    /// Replays retained change log entries from `from` into the row store.
    fn recover(log: &ChangeLog, rows: &RowStore, from: SeqNo) -> TandemResult<(usize, u64)> {
        let mut replayed = 0;
        let mut max_txn = 0;
        for entry in log.read_from(from.max(log.first_retained())) {
            let entry = entry?;
            rows.replay(&entry)?;
            max_txn = max_txn.max(entry.txn_id.as_u64());
            replayed += 1;
        }
        if replayed > 0 {
            info!(replayed, last_seq = %log.last_committed(), "Replayed change log into row store");
        }
        Ok((replayed, max_txn))
    }

    /// Opens an engine on `dir` with otherwise default settings.
    pub fn open_dir(dir: &Path) -> TandemResult<Self> {
        Self::open(EngineConfig::with_data_dir(dir))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn check_open(&self) -> TandemResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TandemError::Closed)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Creates a table and returns its id.
    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> TandemResult<TableId> {
        self.check_open()?;
        let schema = self.catalog.create_table(name, columns)?;
        self.rows.create_table(schema.as_ref().clone())?;
        self.columns.create_table(Arc::clone(&schema))?;
        info!(table = %schema.name, id = %schema.table_id, columns = schema.arity(), "Created table");
        Ok(schema.table_id)
    }

    /// Returns a table's schema.
    pub fn schema(&self, table_id: TableId) -> TandemResult<Arc<TableSchema>> {
        self.catalog.get(table_id)
    }

    /// Returns the id of a table by name.
    pub fn table_id(&self, name: &str) -> TandemResult<TableId> {
        Ok(self.catalog.by_name(name)?.table_id)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Allocates a transaction id.
    pub fn begin_txn(&self) -> TxnId {
        TxnId::new(self.next_txn.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts or replaces a row and returns its commit sequence number.
    pub fn put(&self, table_id: TableId, row_id: RowId, values: Row, txn_id: TxnId) -> TandemResult<SeqNo> {
        self.check_open()?;
        let _token = self.governor.admit(WorkloadClass::Transactional)?;
        self.rows.put(table_id, row_id, values, txn_id)
    }

    /// Deletes a row and returns the commit sequence number.
    pub fn delete(&self, table_id: TableId, row_id: RowId, txn_id: TxnId) -> TandemResult<SeqNo> {
        self.check_open()?;
        let _token = self.governor.admit(WorkloadClass::Transactional)?;
        self.rows.delete(table_id, row_id, txn_id)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the latest version of a row.
    pub fn get(&self, table_id: TableId, row_id: RowId) -> TandemResult<Record> {
        self.check_open()?;
        let _token = self.governor.admit(WorkloadClass::Transactional)?;
        self.rows.get(table_id, row_id)
    }

    /// Returns the version of a row visible at `seq`.
    pub fn get_as_of(&self, table_id: TableId, row_id: RowId, seq: SeqNo) -> TandemResult<Record> {
        self.check_open()?;
        let _token = self.governor.admit(WorkloadClass::Transactional)?;
        self.rows.get_as_of(table_id, row_id, seq)
    }

    /// Routes and runs a query.
    pub fn query(&self, query: &Query) -> TandemResult<QueryResult> {
        self.check_open()?;
        let schema = self.catalog.get(query.table_id)?;
        let route = self.router.route(query, self.log.last_committed())?;
        debug!(table = %schema.name, route = %route, "Routed query");
        let (as_of, output) = match route {
            Route::RowStore => self.query_rows(&schema, query)?,
            Route::ColumnStore { time_bound } => self.query_columns(query, time_bound)?,
        };
        Ok(QueryResult { route, as_of, output })
    }

    fn query_rows(&self, schema: &TableSchema, query: &Query) -> TandemResult<(SeqNo, QueryOutput)> {
        let _token = self.governor.admit(WorkloadClass::Transactional)?;
        let projection = projection(schema, &query.columns)?;
        let table = query.table_id;
        let records = match &query.target {
            QueryTarget::Point(row_id) => self.lookup(schema, query, std::slice::from_ref(row_id))?,
            QueryTarget::Keys(keys) => {
                let mut keys = keys.clone();
                keys.sort_unstable();
                keys.dedup();
                self.lookup(schema, query, &keys)?
            }
            QueryTarget::Range(range) => self.rows.scan_range(table, range.clone(), &query.predicate)?,
            QueryTarget::Scan => self.rows.scan_range(table, .., &query.predicate)?,
            QueryTarget::Aggregate(_) => {
                return Err(TandemError::unsupported("aggregates run on the columnar store"))
            }
        };
        let records = match projection {
            Some(positions) => records.into_iter().map(|r| project(r, &positions)).collect(),
            None => records,
        };
        Ok((self.log.last_committed(), QueryOutput::Records(records)))
    }

    fn lookup(&self, schema: &TableSchema, query: &Query, keys: &[RowId]) -> TandemResult<Vec<Record>> {
        let predicate = query.predicate.bind(schema)?;
        let mut records = Vec::with_capacity(keys.len());
        for row_id in keys {
            match self.rows.get(query.table_id, *row_id) {
                Ok(record) if predicate.eval_row(record.row_id, record.seq, &record.values) => {
                    records.push(record)
                }
                Ok(_) | Err(TandemError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }

    fn query_columns(&self, query: &Query, time_bound: SeqNo) -> TandemResult<(SeqNo, QueryOutput)> {
        let token = self.governor.admit(WorkloadClass::Analytical)?;
        let predicate = match &query.target {
            QueryTarget::Point(row_id) => query.predicate.clone().and(key_eq(*row_id)),
            QueryTarget::Keys(keys) => query
                .predicate
                .clone()
                .and(Predicate::Or(keys.iter().map(|k| key_eq(*k)).collect())),
            QueryTarget::Range(range) => query
                .predicate
                .clone()
                .and(key_cmp(CompareOp::GtEq, *range.start()))
                .and(key_cmp(CompareOp::LtEq, *range.end())),
            QueryTarget::Scan | QueryTarget::Aggregate(_) => query.predicate.clone(),
        };
        let mut request = ScanRequest::new(time_bound)
            .with_columns(query.columns.iter().cloned())
            .with_predicate(predicate);
        if let QueryTarget::Aggregate(aggregate) = &query.target {
            request = request.with_aggregate(aggregate.clone());
        }

        let checkpoint = || token.checkpoint();
        let result = self.columns.scan_with(query.table_id, &request, &checkpoint)?;
        let output = match result.output {
            ScanOutput::Rows(rows) => QueryOutput::Rows(rows),
            ScanOutput::Aggregate(aggregate) => QueryOutput::Aggregate(aggregate),
        };
        Ok((result.watermark, output))
    }

    // =========================================================================
    // Synchronization and observability
    // =========================================================================

    /// Publishes everything committed so far and returns the watermark.
    pub fn sync_now(&self) -> TandemResult<SeqNo> {
        self.check_open()?;
        self.sync.flush()
    }

    /// Writes a row snapshot and lets the change log purge the segments it covers.
    ///
    /// Returns the snapshot position. Without a data directory nothing is
    /// written and the result is [`SeqNo::ZERO`].
    pub fn checkpoint(&self) -> TandemResult<SeqNo> {
        self.check_open()?;
        match &self.checkpointer {
            Some(checkpointer) => checkpointer.run(),
            None => Ok(SeqNo::ZERO),
        }
    }

    /// Returns the columnar watermark.
    #[must_use]
    pub fn watermark(&self) -> SeqNo {
        self.columns.watermark()
    }

    /// Returns the last committed sequence number.
    #[must_use]
    pub fn last_committed(&self) -> SeqNo {
        self.log.last_committed()
    }

    /// Returns the resource governor.
    #[must_use]
    pub fn governor(&self) -> &ResourceGovernor {
        &self.governor
    }

    /// Returns an observability snapshot.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let watermark = self.columns.watermark();
        let last_committed = self.log.last_committed();
        EngineStats {
            watermark,
            last_committed,
            lag: last_committed.distance_from(watermark),
            tables: self.catalog.tables().len(),
            retained_entries: self.log.len(),
            uptime: self.started_at.elapsed(),
            rows: self.rows.stats(),
            log: self.log.stats().snapshot(),
            columns: self.columns.stats(),
            sync: self.sync.stats(),
            governor: self.governor.stats(),
            router: self.router.stats(),
        }
    }

    /// Stops the synchronizer, publishes what is left and closes the log.
    pub fn shutdown(&self) -> TandemResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down engine");
        self.governor.close();
        if let Some(mut worker) = self.checkpoint_worker.lock().take() {
            worker.shutdown();
        }
        if let Some(mut worker) = self.worker.lock().take() {
            worker.shutdown();
        }
        if !self.sync.is_halted() {
            if let Err(err) = self.sync.flush() {
                warn!(error = %err, "Final synchronization failed");
            }
        }
        if let Some(checkpointer) = &self.checkpointer {
            if self.config.change_log.purge_segments {
                if let Err(err) = checkpointer.run() {
                    warn!(error = %err, "Final checkpoint failed");
                }
            }
        }
        self.log.sync()?;
        self.log.close()?;
        info!(last_committed = %self.log.last_committed(), watermark = %self.columns.watermark(), "Engine shut down");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "Engine shutdown on drop failed");
        }
    }
}

fn key_eq(row_id: RowId) -> Predicate {
    key_cmp(CompareOp::Eq, row_id)
}

fn key_cmp(op: CompareOp, row_id: RowId) -> Predicate {
    Predicate::compare(ROW_ID_COLUMN, op, Value::unsigned(row_id.as_u64()))
}

fn projection(schema: &TableSchema, columns: &[String]) -> TandemResult<Option<Vec<usize>>> {
    if columns.is_empty() {
        return Ok(None);
    }
    columns
        .iter()
        .map(|name| {
            schema.column_index(name).ok_or_else(|| {
                TandemError::schema_mismatch(format!(
                    "unknown column '{}' in table '{}'",
                    name, schema.name
                ))
            })
        })
        .collect::<TandemResult<Vec<_>>>()
        .map(Some)
}

fn project(record: Record, positions: &[usize]) -> Record {
    let values: Row = positions
        .iter()
        .map(|p| record.values.get(*p).cloned().unwrap_or(Value::Null))
        .collect();
    Record {
        values: Arc::new(values),
        ..record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Staleness;
    use tandem_column::Aggregate;
    use tandem_common::types::ColumnType;

    fn engine() -> (Engine, TableId) {
        let engine = Engine::open_manual(EngineConfig::for_testing()).unwrap();
        let table = engine
            .create_table(
                "accounts",
                vec![
                    ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
                    ColumnDef::new("type", ColumnType::Text),
                ],
            )
            .unwrap();
        (engine, table)
    }

    fn deposit(cents: i128) -> Row {
        vec![Value::decimal(cents, 2), Value::text("DEPOSIT")]
    }

    #[test]
    fn test_point_query_reads_row_store() {
        let (engine, table) = engine();
        let txn = engine.begin_txn();
        let seq = engine.put(table, RowId::new(7), deposit(1_000), txn).unwrap();

        let result = engine.query(&Query::point(table, RowId::new(7))).unwrap();
        assert_eq!(result.route, Route::RowStore);
        assert_eq!(result.as_of, seq);
        assert_eq!(result.records().unwrap()[0].values[0], Value::decimal(1_000, 2));

        let missing = engine.query(&Query::point(table, RowId::new(8))).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_projection_on_row_store() {
        let (engine, table) = engine();
        engine.put(table, RowId::new(1), deposit(5), engine.begin_txn()).unwrap();
        let result = engine
            .query(&Query::keys(table, vec![RowId::new(1), RowId::new(1)]).with_columns(["type"]))
            .unwrap();
        let records = result.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].values.as_ref(), &vec![Value::text("DEPOSIT")]);
        assert!(engine
            .query(&Query::point(table, RowId::new(1)).with_columns(["nope"]))
            .is_err());
    }

    #[test]
    fn test_aggregate_waits_for_sync() {
        let (engine, table) = engine();
        for i in 1..=10 {
            engine.put(table, RowId::new(i), deposit(100), engine.begin_txn()).unwrap();
        }
        let latest = engine.last_committed();
        let query = Query::aggregate(table, Aggregate::new().count().sum("amount"))
            .with_staleness(Staleness::AtLeast(latest));
        assert!(matches!(engine.query(&query), Err(TandemError::StaleData { .. })));

        assert_eq!(engine.sync_now().unwrap(), latest);
        let result = engine.query(&query).unwrap();
        assert_eq!(result.as_of, latest);
        let aggregate = result.aggregate().unwrap();
        assert_eq!(aggregate.scalar("count(*)"), Some(&Value::Int64(10)));
        assert_eq!(aggregate.scalar("sum(amount)"), Some(&Value::decimal(1_000, 2)));
        assert_eq!(engine.stats().lag, 0);
    }

    #[test]
    fn test_wide_range_reads_columns() {
        let (engine, table) = engine();
        for i in 1..=200 {
            engine.put(table, RowId::new(i), deposit(i as i128), engine.begin_txn()).unwrap();
        }
        engine.sync_now().unwrap();
        let result = engine
            .query(&Query::range(table, RowId::new(50)..=RowId::new(149)))
            .unwrap();
        assert!(matches!(result.route, Route::ColumnStore { .. }));
        assert_eq!(result.rows().unwrap().len(), 100);

        let fresh = engine
            .query(&Query::range(table, RowId::new(50)..=RowId::new(149)).with_staleness(Staleness::Fresh))
            .unwrap();
        assert_eq!(fresh.route, Route::RowStore);
        assert_eq!(fresh.len(), 100);
    }

    #[test]
    fn test_reopen_recovers_rows_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::with_data_dir(dir.path());
        let (table, last) = {
            let engine = Engine::open_manual(config.clone()).unwrap();
            let table = engine
                .create_table("accounts", vec![ColumnDef::new("amount", ColumnType::Decimal { scale: 2 })])
                .unwrap();
            for i in 1..=20 {
                engine
                    .put(table, RowId::new(i), vec![Value::decimal(250, 2)], engine.begin_txn())
                    .unwrap();
            }
            engine.delete(table, RowId::new(20), engine.begin_txn()).unwrap();
            let last = engine.last_committed();
            engine.shutdown().unwrap();
            (table, last)
        };

        let engine = Engine::open_manual(config).unwrap();
        assert_eq!(engine.table_id("accounts").unwrap(), table);
        assert_eq!(engine.last_committed(), last);
        assert_eq!(engine.watermark(), last);
        assert!(matches!(
            engine.get(table, RowId::new(20)),
            Err(TandemError::NotFound { .. })
        ));
        let result = engine
            .query(&Query::aggregate(table, Aggregate::new().count()).with_staleness(Staleness::AtLeast(last)))
            .unwrap();
        assert_eq!(result.aggregate().unwrap().scalar("count(*)"), Some(&Value::Int64(19)));

        let next = engine.put(table, RowId::new(21), vec![Value::decimal(1, 2)], engine.begin_txn()).unwrap();
        assert_eq!(next, last.next());
    }

    #[test]
    fn test_background_sync_on_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open_dir(dir.path()).unwrap();
        let table = engine
            .create_table("accounts", vec![ColumnDef::new("amount", ColumnType::Decimal { scale: 2 })])
            .unwrap();
        for i in 1..=10 {
            engine.put(table, RowId::new(i), vec![Value::decimal(100, 2)], engine.begin_txn()).unwrap();
        }
        let last = engine.last_committed();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while engine.watermark() < last && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let result = engine
            .query(&Query::aggregate(table, Aggregate::new().count()).with_staleness(Staleness::AtLeast(last)))
            .unwrap();
        assert_eq!(result.as_of, last);
        assert_eq!(result.aggregate().unwrap().scalar("count(*)"), Some(&Value::Int64(10)));
        assert!(dir.path().join(LOG_DIR).is_dir());
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_closed_engine_refuses_work() {
        let (engine, table) = engine();
        engine.shutdown().unwrap();
        assert!(matches!(
            engine.put(table, RowId::new(1), deposit(1), TxnId::new(1)),
            Err(TandemError::Closed)
        ));
        assert!(engine.shutdown().is_ok());
    }
}
