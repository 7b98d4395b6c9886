//! The columnar store.
//!
//! Each table has an immutable [`TableVersion`]: the list of published
//! chunk groups with their delete vectors. Publishing and compaction build
//! the next version off to the side and install it with a single pointer
//! swap; scans clone the current `Arc` and never block writers.
//!
//! The store-wide watermark is one atomic sequence number that only moves
//! forward. A scan is served only if its time bound is at or below it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use tandem_common::config::ColumnStoreConfig;
use tandem_common::types::{ChunkId, RowId, SeqNo, TableId, TableSchema};
use tandem_common::{TandemError, TandemResult};

use crate::delete::DeleteVector;
use crate::group::{ChunkGroup, GroupRow};
use crate::scan::{ScanPlan, ScanRequest, ScanResult, ScanYield};

/// A published chunk group and its current delete vector.
#[derive(Debug, Clone)]
pub struct GroupHandle {
    /// Sealed group.
    pub group: Arc<ChunkGroup>,
    /// Rows of the group superseded so far.
    pub deletes: Arc<DeleteVector>,
}

impl GroupHandle {
    fn new(group: ChunkGroup) -> Self {
        let deletes = DeleteVector::new(group.row_count());
        Self {
            group: Arc::new(group),
            deletes: Arc::new(deletes),
        }
    }
}

/// Immutable snapshot of one table's columnar data.
#[derive(Debug, Clone)]
pub struct TableVersion {
    schema: Arc<TableSchema>,
    groups: Vec<GroupHandle>,
    last_seq: SeqNo,
    version: u64,
}

impl TableVersion {
    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Returns the groups in chunk-id order.
    #[must_use]
    pub fn groups(&self) -> &[GroupHandle] {
        &self.groups
    }

    /// Returns the last sequence number published for this table.
    #[must_use]
    pub fn last_seq(&self) -> SeqNo {
        self.last_seq
    }

    /// Returns the version counter, bumped on every swap.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the number of live rows.
    #[must_use]
    pub fn live_rows(&self) -> usize {
        self.groups.iter().map(|h| h.deletes.live_count()).sum()
    }

    /// Returns the number of superseded rows still stored.
    #[must_use]
    pub fn deleted_rows(&self) -> usize {
        self.groups.iter().map(|h| h.deletes.deleted_count()).sum()
    }

    fn position(&self, id: ChunkId) -> Option<usize> {
        self.groups.binary_search_by_key(&id, |h| h.group.id()).ok()
    }
}

struct ColumnTable {
    schema: Arc<TableSchema>,
    current: RwLock<Arc<TableVersion>>,
    /// Row key to (group, offset) of its live image. Guarded for writers only.
    locator: Mutex<HashMap<RowId, (ChunkId, usize)>>,
}

impl ColumnTable {
    fn snapshot(&self) -> Arc<TableVersion> {
        Arc::clone(&self.current.read())
    }

    fn install(&self, version: TableVersion) {
        *self.current.write() = Arc::new(version);
    }
}

/// Columnar store counters.
#[derive(Debug, Default)]
pub struct ColumnStoreStats {
    /// Groups published.
    pub publishes: AtomicU64,
    /// Scans served.
    pub scans: AtomicU64,
    /// Scans refused with `StaleData`.
    pub stale_scans: AtomicU64,
    /// Groups skipped by zone maps.
    pub groups_pruned: AtomicU64,
    /// Compaction passes that replaced groups.
    pub compactions: AtomicU64,
}

/// Compression of one column across all of its chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCompression {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Bytes the values take in plain encoding.
    pub plain_bytes: usize,
    /// Bytes actually stored.
    pub encoded_bytes: usize,
}

impl ColumnCompression {
    /// Plain size divided by stored size.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.encoded_bytes == 0 {
            1.0
        } else {
            self.plain_bytes as f64 / self.encoded_bytes as f64
        }
    }
}

/// Point-in-time view of the columnar store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnStoreStatsSnapshot {
    /// Current watermark.
    pub watermark: SeqNo,
    /// Published chunk groups across tables.
    pub chunk_groups: usize,
    /// Live rows across tables.
    pub live_rows: usize,
    /// Superseded rows still stored.
    pub deleted_rows: usize,
    /// Groups published.
    pub publishes: u64,
    /// Scans served.
    pub scans: u64,
    /// Scans refused as stale.
    pub stale_scans: u64,
    /// Groups skipped by zone maps.
    pub groups_pruned: u64,
    /// Compaction passes that replaced groups.
    pub compactions: u64,
    /// Per-column compression, ordered by table id then column position.
    pub columns: Vec<ColumnCompression>,
}

/// Compressed columnar copy of the row store.
pub struct ColumnStore {
    config: ColumnStoreConfig,
    tables: RwLock<HashMap<TableId, Arc<ColumnTable>>>,
    watermark: AtomicU64,
    stats: ColumnStoreStats,
}

impl ColumnStore {
    /// Creates an empty store whose watermark starts at `watermark`.
    #[must_use]
    pub fn new(config: ColumnStoreConfig, watermark: SeqNo) -> Self {
        Self {
            config,
            tables: RwLock::new(HashMap::new()),
            watermark: AtomicU64::new(watermark.as_u64()),
            stats: ColumnStoreStats::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ColumnStoreConfig {
        &self.config
    }

    /// Registers a table.
    pub fn create_table(&self, schema: Arc<TableSchema>) -> TandemResult<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.table_id) {
            return Err(TandemError::TableExists {
                table: schema.name.clone(),
            });
        }
        let version = TableVersion {
            schema: Arc::clone(&schema),
            groups: Vec::new(),
            last_seq: SeqNo::ZERO,
            version: 0,
        };
        tables.insert(
            schema.table_id,
            Arc::new(ColumnTable {
                schema: Arc::clone(&schema),
                current: RwLock::new(Arc::new(version)),
                locator: Mutex::new(HashMap::new()),
            }),
        );
        debug!(table = %schema.name, "Created columnar table");
        Ok(())
    }

    fn table(&self, table_id: TableId) -> TandemResult<Arc<ColumnTable>> {
        self.tables
            .read()
            .get(&table_id)
            .cloned()
            .ok_or_else(|| TandemError::table_not_found(table_id))
    }

    /// Returns a table's schema.
    pub fn schema(&self, table_id: TableId) -> TandemResult<Arc<TableSchema>> {
        Ok(Arc::clone(&self.table(table_id)?.schema))
    }

    /// Returns the current version of a table.
    pub fn snapshot(&self, table_id: TableId) -> TandemResult<Arc<TableVersion>> {
        Ok(self.table(table_id)?.snapshot())
    }

    /// Returns the watermark.
    #[must_use]
    pub fn watermark(&self) -> SeqNo {
        SeqNo::new(self.watermark.load(Ordering::Acquire))
    }

    /// Moves the watermark forward to `seq`; never moves it back.
    ///
    /// Returns the watermark after the call.
    pub fn advance_watermark(&self, seq: SeqNo) -> SeqNo {
        let previous = self.watermark.fetch_max(seq.as_u64(), Ordering::AcqRel);
        SeqNo::new(previous.max(seq.as_u64()))
    }

    /// Encodes a group for `table_id` with this store's encoding settings.
    pub fn build_group(
        &self,
        table_id: TableId,
        first_seq: SeqNo,
        last_seq: SeqNo,
        rows: &[GroupRow],
        deleted: Vec<RowId>,
    ) -> TandemResult<ChunkGroup> {
        let schema = self.schema(table_id)?;
        ChunkGroup::build(
            ChunkId::new(table_id, first_seq),
            &schema,
            last_seq,
            rows,
            deleted,
            &self.config,
        )
    }

    /// Publishes a sealed group.
    ///
    /// Rows the group carries or deletes are marked superseded in the
    /// groups that held their previous image. Returns false if the group's
    /// range was already published.
    pub fn publish(&self, group: ChunkGroup) -> TandemResult<bool> {
        let table = self.table(group.id().table_id)?;
        let mut locator = table.locator.lock();
        let current = table.snapshot();

        if group.last_seq() <= current.last_seq {
            debug!(group = %group.id(), "Skipped already published chunk group");
            return Ok(false);
        }
        if group.first_seq() <= current.last_seq {
            return Err(TandemError::internal(format!(
                "chunk group {} overlaps published range ending at {}",
                group.id(),
                current.last_seq
            )));
        }

        let mut groups = current.groups.clone();
        let mut touched: HashMap<usize, DeleteVector> = HashMap::new();
        for row_id in group.row_ids().iter().chain(group.deleted_keys()) {
            if let Some((chunk, offset)) = locator.remove(row_id) {
                if let Some(index) = current.position(chunk) {
                    touched
                        .entry(index)
                        .or_insert_with(|| groups[index].deletes.as_ref().clone())
                        .mark(offset);
                }
            }
        }
        for (index, deletes) in touched {
            groups[index].deletes = Arc::new(deletes);
        }
        for (offset, row_id) in group.row_ids().iter().enumerate() {
            locator.insert(*row_id, (group.id(), offset));
        }

        let id = group.id();
        let last_seq = group.last_seq();
        let rows = group.row_count();
        groups.push(GroupHandle::new(group));
        table.install(TableVersion {
            schema: Arc::clone(&table.schema),
            groups,
            last_seq,
            version: current.version + 1,
        });
        drop(locator);

        self.stats.publishes.fetch_add(1, Ordering::Relaxed);
        debug!(group = %id, rows, last_seq = %last_seq, "Published chunk group");
        Ok(true)
    }

    /// Scans a table.
    pub fn scan(&self, table_id: TableId, request: &ScanRequest) -> TandemResult<ScanResult> {
        self.scan_with(table_id, request, &never_yield)
    }

    /// Scans a table, calling `hook` between chunk groups.
    pub fn scan_with(
        &self,
        table_id: TableId,
        request: &ScanRequest,
        hook: &dyn ScanYield,
    ) -> TandemResult<ScanResult> {
        let watermark = self.watermark();
        if request.time_bound > watermark {
            self.stats.stale_scans.fetch_add(1, Ordering::Relaxed);
            return Err(TandemError::StaleData {
                required: request.time_bound,
                watermark,
            });
        }

        let snapshot = self.snapshot(table_id)?;
        let plan = ScanPlan::bind(&snapshot.schema, request)?;
        let groups: Vec<(&ChunkGroup, &DeleteVector)> = snapshot
            .groups
            .iter()
            .map(|h| (h.group.as_ref(), h.deletes.as_ref()))
            .collect();
        let (output, groups_scanned, groups_pruned) = plan.execute(&groups, hook)?;

        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        self.stats
            .groups_pruned
            .fetch_add(groups_pruned as u64, Ordering::Relaxed);
        Ok(ScanResult {
            output,
            watermark,
            groups_scanned,
            groups_pruned,
        })
    }

    /// Merges runs of adjacent small or mostly-deleted groups of one table.
    ///
    /// Returns the number of groups replaced.
    pub fn compact(&self, table_id: TableId) -> TandemResult<usize> {
        let table = self.table(table_id)?;
        let mut locator = table.locator.lock();
        let current = table.snapshot();

        let candidate = |h: &GroupHandle| {
            h.deletes.live_count() < self.config.compaction_small_group_rows
                || (h.deletes.deleted_count() > 0
                    && h.deletes.deleted_ratio() >= self.config.compaction_deleted_ratio)
        };

        let mut runs: Vec<(usize, usize)> = Vec::new();
        let mut start = None;
        for (index, handle) in current.groups.iter().enumerate() {
            match (candidate(handle), start) {
                (true, None) => start = Some(index),
                (false, Some(s)) => {
                    runs.push((s, index));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, current.groups.len()));
        }
        runs.retain(|(s, e)| e - s >= 2 || current.groups[*s].deletes.deleted_count() > 0);
        if runs.is_empty() {
            return Ok(0);
        }

        let mut groups = Vec::with_capacity(current.groups.len());
        let mut replaced = 0;
        let mut next = 0;
        for (s, e) in runs {
            groups.extend(current.groups[next..s].iter().cloned());
            let run = &current.groups[s..e];
            if let Some(merged) = self.merge_run(&table.schema, run)? {
                for (offset, row_id) in merged.row_ids().iter().enumerate() {
                    locator.insert(*row_id, (merged.id(), offset));
                }
                groups.push(GroupHandle::new(merged));
            }
            replaced += run.len();
            next = e;
        }
        groups.extend(current.groups[next..].iter().cloned());

        let before = current.groups.len();
        let after = groups.len();
        table.install(TableVersion {
            schema: Arc::clone(&table.schema),
            groups,
            last_seq: current.last_seq,
            version: current.version + 1,
        });
        drop(locator);

        self.stats.compactions.fetch_add(1, Ordering::Relaxed);
        info!(table = %table.schema.name, before, after, replaced, "Compacted chunk groups");
        Ok(replaced)
    }

    fn merge_run(&self, schema: &TableSchema, run: &[GroupHandle]) -> TandemResult<Option<ChunkGroup>> {
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            return Ok(None);
        };
        let mut rows = Vec::new();
        for handle in run {
            let group = &handle.group;
            for (offset, values) in group.decode_rows()?.into_iter().enumerate() {
                if !handle.deletes.is_deleted(offset) {
                    rows.push(GroupRow {
                        row_id: group.row_ids()[offset],
                        seq: group.seqs()[offset],
                        values: Arc::new(values),
                    });
                }
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }
        let generation = run.iter().map(|h| h.group.id().generation).max().unwrap_or(0) + 1;
        ChunkGroup::build(
            first.group.id().compacted(generation),
            schema,
            last.group.last_seq(),
            &rows,
            Vec::new(),
            &self.config,
        )
        .map(Some)
    }

    /// Returns the ids of all tables.
    #[must_use]
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.tables.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Returns a snapshot of the counters and per-column compression.
    #[must_use]
    pub fn stats(&self) -> ColumnStoreStatsSnapshot {
        let mut snapshot = ColumnStoreStatsSnapshot {
            watermark: self.watermark(),
            publishes: self.stats.publishes.load(Ordering::Relaxed),
            scans: self.stats.scans.load(Ordering::Relaxed),
            stale_scans: self.stats.stale_scans.load(Ordering::Relaxed),
            groups_pruned: self.stats.groups_pruned.load(Ordering::Relaxed),
            compactions: self.stats.compactions.load(Ordering::Relaxed),
            ..ColumnStoreStatsSnapshot::default()
        };
        for table_id in self.table_ids() {
            let Ok(version) = self.snapshot(table_id) else {
                continue;
            };
            snapshot.chunk_groups += version.groups.len();
            snapshot.live_rows += version.live_rows();
            snapshot.deleted_rows += version.deleted_rows();
            for (position, column) in version.schema.columns.iter().enumerate() {
                let (plain, encoded) = version
                    .groups
                    .iter()
                    .filter_map(|h| h.group.column(position))
                    .fold((0, 0), |(p, e), c| (p + c.plain_size(), e + c.encoded_size()));
                snapshot.columns.push(ColumnCompression {
                    table: version.schema.name.clone(),
                    column: column.name.clone(),
                    plain_bytes: plain,
                    encoded_bytes: encoded,
                });
            }
        }
        snapshot
    }
}

fn never_yield() -> TandemResult<()> {
    Ok(())
}
