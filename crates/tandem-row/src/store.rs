//! The row store.

use std::ops::RangeBounds;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, trace};

use tandem_common::config::RowStoreConfig;
use tandem_common::types::{Predicate, Row, RowId, SeqNo, TableId, TableSchema, TxnId};
use tandem_common::{TandemError, TandemResult};
use tandem_log::{ChangeDraft, ChangeEntry, ChangeLog};

use crate::latch::RowLatchTable;
use crate::table::{Record, RowTable};

/// Row store counters.
#[derive(Debug, Default)]
pub struct RowStoreStats {
    /// Committed puts.
    pub puts: AtomicU64,
    /// Committed deletes.
    pub deletes: AtomicU64,
    /// Point reads.
    pub gets: AtomicU64,
    /// Range scans.
    pub scans: AtomicU64,
    /// Entries installed by replay.
    pub replayed: AtomicU64,
}

/// Copy of the row store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowStoreStatsSnapshot {
    /// Committed puts.
    pub puts: u64,
    /// Committed deletes.
    pub deletes: u64,
    /// Point reads.
    pub gets: u64,
    /// Range scans.
    pub scans: u64,
    /// Entries installed by replay.
    pub replayed: u64,
    /// Latch acquisitions that had to wait.
    pub latch_waits: u64,
    /// Latch acquisitions that timed out.
    pub latch_timeouts: u64,
    /// Live rows across all tables.
    pub live_rows: u64,
}

/// Latch-protected row store.
///
/// Every mutation goes through the change log commit section: the version
/// is installed by the append callback, so a row never becomes visible
/// before its change entry exists.
pub struct RowStore {
    config: RowStoreConfig,
    log: Arc<ChangeLog>,
    tables: DashMap<TableId, Arc<RowTable>>,
    names: DashMap<String, TableId>,
    latches: RowLatchTable,
    stats: RowStoreStats,
}

impl RowStore {
    /// Creates a row store writing to `log`.
    #[must_use]
    pub fn new(config: RowStoreConfig, log: Arc<ChangeLog>) -> Self {
        Self {
            config,
            log,
            tables: DashMap::new(),
            names: DashMap::new(),
            latches: RowLatchTable::new(),
            stats: RowStoreStats::default(),
        }
    }

    /// Returns the change log.
    #[must_use]
    pub fn log(&self) -> &Arc<ChangeLog> {
        &self.log
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RowStoreConfig {
        &self.config
    }

    /// Registers a table.
    pub fn create_table(&self, schema: TableSchema) -> TandemResult<Arc<RowTable>> {
        let table_id = schema.table_id;
        let name = schema.name.clone();
        let Entry::Vacant(slot) = self.names.entry(name.clone()) else {
            return Err(TandemError::TableExists { table: name });
        };
        let table = match self.tables.entry(table_id) {
            Entry::Occupied(_) => {
                return Err(TandemError::TableExists {
                    table: table_id.to_string(),
                })
            }
            Entry::Vacant(entry) => {
                let table = Arc::new(RowTable::new(schema, &self.config));
                entry.insert(Arc::clone(&table));
                table
            }
        };
        slot.insert(table_id);
        info!(table = %name, table_id = %table_id, "Created row table");
        Ok(table)
    }

    /// Returns a table by id.
    pub fn table(&self, table_id: TableId) -> TandemResult<Arc<RowTable>> {
        self.tables
            .get(&table_id)
            .map(|t| Arc::clone(&t))
            .ok_or_else(|| TandemError::table_not_found(table_id))
    }

    /// Returns a table by name.
    pub fn table_by_name(&self, name: &str) -> TandemResult<Arc<RowTable>> {
        let table_id = self
            .names
            .get(name)
            .map(|id| *id)
            .ok_or_else(|| TandemError::table_not_found(name))?;
        self.table(table_id)
    }

    /// Returns the schemas of all tables, ordered by table id.
    #[must_use]
    pub fn schemas(&self) -> Vec<Arc<TableSchema>> {
        let mut schemas: Vec<_> = self
            .tables
            .iter()
            .map(|t| Arc::clone(t.schema()))
            .collect();
        schemas.sort_by_key(|s| s.table_id);
        schemas
    }

    /// Inserts or replaces a row and returns its commit sequence number.
    pub fn put(&self, table_id: TableId, row_id: RowId, values: Row, txn_id: TxnId) -> TandemResult<SeqNo> {
        let table = self.table(table_id)?;
        let values = table.schema().conform_row(values)?;

        let _latch = self
            .latches
            .acquire(table_id, row_id, self.config.latch_timeout())?;
        let before = table.latest(row_id).map(|r| r.values.as_ref().clone());
        let draft = ChangeDraft::upsert(table_id, row_id, txn_id, before, values);
        let (entry, _) = self.log.append_with(draft, |entry| table.install(entry))?;

        self.stats.puts.fetch_add(1, Ordering::Relaxed);
        trace!(table_id = %table_id, row_id = %row_id, seq = %entry.seq, "Put row");
        Ok(entry.seq)
    }

    /// Deletes a row and returns the commit sequence number of the delete.
    pub fn delete(&self, table_id: TableId, row_id: RowId, txn_id: TxnId) -> TandemResult<SeqNo> {
        let table = self.table(table_id)?;

        let _latch = self
            .latches
            .acquire(table_id, row_id, self.config.latch_timeout())?;
        let before = table
            .latest(row_id)
            .ok_or(TandemError::NotFound { table_id, row_id })?;
        let draft = ChangeDraft::delete(table_id, row_id, txn_id, before.values.as_ref().clone());
        let (entry, _) = self.log.append_with(draft, |entry| table.install(entry))?;

        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        trace!(table_id = %table_id, row_id = %row_id, seq = %entry.seq, "Deleted row");
        Ok(entry.seq)
    }

    /// Returns the latest committed version of a row.
    pub fn get(&self, table_id: TableId, row_id: RowId) -> TandemResult<Record> {
        self.stats.gets.fetch_add(1, Ordering::Relaxed);
        self.table(table_id)?
            .latest(row_id)
            .ok_or(TandemError::NotFound { table_id, row_id })
    }

    /// Returns the version of a row visible at `seq`.
    ///
    /// Fails with `NotFound` if the row did not exist at `seq` or that
    /// version has already been dropped from its chain.
    pub fn get_as_of(&self, table_id: TableId, row_id: RowId, seq: SeqNo) -> TandemResult<Record> {
        self.stats.gets.fetch_add(1, Ordering::Relaxed);
        self.table(table_id)?
            .as_of(row_id, seq)
            .ok_or(TandemError::NotFound { table_id, row_id })
    }

    /// Returns live rows in `range` matching `predicate`, ordered by row id.
    pub fn scan_range(
        &self,
        table_id: TableId,
        range: impl RangeBounds<RowId>,
        predicate: &Predicate,
    ) -> TandemResult<Vec<Record>> {
        let table = self.table(table_id)?;
        let bound = predicate.bind(table.schema())?;
        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        Ok(table.scan(&range, &bound))
    }

    /// Installs a recovered change entry without logging it again.
    ///
    /// Returns false if the entry was already installed.
    pub fn replay(&self, entry: &ChangeEntry) -> TandemResult<bool> {
        let table = self.table(entry.table_id)?;
        let installed = table.install(entry);
        if installed {
            self.stats.replayed.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(seq = %entry.seq, row_id = %entry.row_id, "Skipped replay of installed entry");
        }
        Ok(installed)
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> RowStoreStatsSnapshot {
        let latch = self.latches.stats();
        RowStoreStatsSnapshot {
            puts: self.stats.puts.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            gets: self.stats.gets.load(Ordering::Relaxed),
            scans: self.stats.scans.load(Ordering::Relaxed),
            replayed: self.stats.replayed.load(Ordering::Relaxed),
            latch_waits: latch.waits.load(Ordering::Relaxed),
            latch_timeouts: latch.timeouts.load(Ordering::Relaxed),
            live_rows: self.tables.iter().map(|t| t.row_count()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tandem_common::config::ChangeLogConfig;
    use tandem_common::types::{ColumnDef, ColumnType, Value};

    const ACCOUNTS: TableId = TableId::new(1);

    fn store() -> RowStore {
        store_with(RowStoreConfig::default())
    }

    fn store_with(config: RowStoreConfig) -> RowStore {
        let log = Arc::new(ChangeLog::in_memory(ChangeLogConfig::default()));
        let store = RowStore::new(config, log);
        store
            .create_table(
                TableSchema::new(
                    ACCOUNTS,
                    "accounts",
                    vec![
                        ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }).not_null(),
                        ColumnDef::new("kind", ColumnType::Text),
                    ],
                )
                .unwrap(),
            )
            .unwrap();
        store
    }

    fn row(cents: i128, kind: &str) -> Row {
        vec![Value::decimal(cents, 2), Value::from(kind)]
    }

    #[test]
    fn test_read_after_write() {
        let store = store();
        let seq = store
            .put(ACCOUNTS, RowId::new(12345), row(500_000, "DEPOSIT"), TxnId::new(1))
            .unwrap();
        let record = store.get(ACCOUNTS, RowId::new(12345)).unwrap();
        assert_eq!(record.seq, seq);
        assert_eq!(record.values[0], Value::decimal(500_000, 2));
        assert_eq!(store.log().last_committed(), seq);
    }

    #[test]
    fn test_update_carries_before_image() {
        let store = store();
        store
            .put(ACCOUNTS, RowId::new(1), row(100, "DEPOSIT"), TxnId::new(1))
            .unwrap();
        let seq = store
            .put(ACCOUNTS, RowId::new(1), row(250, "DEPOSIT"), TxnId::new(2))
            .unwrap();
        let entries = store.log().fetch(seq, 1).unwrap();
        assert_eq!(entries[0].kind, tandem_log::ChangeKind::Update);
        assert_eq!(entries[0].before.as_ref().unwrap()[0], Value::decimal(100, 2));
    }

    #[test]
    fn test_schema_checked_before_logging() {
        let store = store();
        let err = store
            .put(ACCOUNTS, RowId::new(1), vec![Value::Null, Value::Null], TxnId::new(1))
            .unwrap_err();
        assert!(matches!(err, TandemError::SchemaMismatch { .. }));
        assert!(store.log().is_empty());

        let err = store
            .put(TableId::new(9), RowId::new(1), row(1, "x"), TxnId::new(1))
            .unwrap_err();
        assert!(matches!(err, TandemError::TableNotFound { .. }));
    }

    #[test]
    fn test_delete_and_point_in_time() {
        let store = store();
        let first = store
            .put(ACCOUNTS, RowId::new(3), row(1, "DEPOSIT"), TxnId::new(1))
            .unwrap();
        let deleted = store.delete(ACCOUNTS, RowId::new(3), TxnId::new(2)).unwrap();

        assert!(matches!(
            store.get(ACCOUNTS, RowId::new(3)),
            Err(TandemError::NotFound { .. })
        ));
        assert_eq!(store.get_as_of(ACCOUNTS, RowId::new(3), first).unwrap().seq, first);
        assert!(store.get_as_of(ACCOUNTS, RowId::new(3), deleted).is_err());
        assert!(matches!(
            store.delete(ACCOUNTS, RowId::new(3), TxnId::new(3)),
            Err(TandemError::NotFound { .. })
        ));
        assert_eq!(store.stats().live_rows, 0);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let store = store();
        let schema = TableSchema::new(
            TableId::new(2),
            "accounts",
            vec![ColumnDef::new("v", ColumnType::Int64)],
        )
        .unwrap();
        assert!(matches!(
            store.create_table(schema),
            Err(TandemError::TableExists { .. })
        ));
        assert_eq!(store.table_by_name("accounts").unwrap().id(), ACCOUNTS);
    }

    #[test]
    fn test_concurrent_puts_same_row() {
        let store = Arc::new(store());
        let handles: Vec<_> = [(1_i128, "A"), (2, "B")]
            .into_iter()
            .enumerate()
            .map(|(i, (cents, kind))| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .put(ACCOUNTS, RowId::new(42), row(cents, kind), TxnId::new(i as u64 + 1))
                        .unwrap()
                })
            })
            .collect();
        let seqs: Vec<SeqNo> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let record = store.get(ACCOUNTS, RowId::new(42)).unwrap();
        let last = seqs.into_iter().max().unwrap();
        assert_eq!(record.seq, last);
        assert!(matches!(&record.values[1], Value::Text(kind) if kind == "A" || kind == "B"));
    }

    #[test]
    fn test_latch_timeout_leaves_no_trace() {
        let store = store_with(RowStoreConfig::default().with_latch_timeout(Duration::from_millis(10)));
        let held = store
            .latches
            .acquire(ACCOUNTS, RowId::new(5), Duration::ZERO)
            .unwrap();
        let err = store
            .put(ACCOUNTS, RowId::new(5), row(1, "x"), TxnId::new(1))
            .unwrap_err();
        assert!(matches!(err, TandemError::LockTimeout { .. }));
        drop(held);
        assert!(store.log().is_empty());
        assert_eq!(store.stats().latch_timeouts, 1);
    }

    #[test]
    fn test_scan_range() {
        let store = store();
        for id in 0..10u64 {
            let kind = if id % 2 == 0 { "DEPOSIT" } else { "WITHDRAWAL" };
            store
                .put(ACCOUNTS, RowId::new(id), row(id as i128 * 100, kind), TxnId::new(id))
                .unwrap();
        }
        let predicate = Predicate::eq("kind", Value::from("DEPOSIT"));
        let records = store
            .scan_range(ACCOUNTS, RowId::new(2)..=RowId::new(8), &predicate)
            .unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.row_id.as_u64()).collect();
        assert_eq!(ids, vec![2, 4, 6, 8]);

        let err = store
            .scan_range(ACCOUNTS, .., &Predicate::eq("missing", Value::Int64(1)))
            .unwrap_err();
        assert!(matches!(err, TandemError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let source = store();
        source
            .put(ACCOUNTS, RowId::new(1), row(1, "a"), TxnId::new(1))
            .unwrap();
        source
            .put(ACCOUNTS, RowId::new(1), row(2, "b"), TxnId::new(2))
            .unwrap();
        let entries = source.log().fetch(SeqNo::FIRST, 16).unwrap();

        let target = store();
        for entry in &entries {
            assert!(target.replay(entry).unwrap());
        }
        assert!(!target.replay(&entries[0]).unwrap());
        let record = target.get(ACCOUNTS, RowId::new(1)).unwrap();
        assert_eq!(record.values[1], Value::from("b"));
        assert_eq!(target.stats().replayed, 2);
    }
}
