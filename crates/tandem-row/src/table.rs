//! One table of the row store.

use std::ops::RangeBounds;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use tandem_common::config::RowStoreConfig;
use tandem_common::types::{BoundPredicate, Row, RowId, SeqNo, TableId, TableSchema, Timestamp, TxnId};
use tandem_log::ChangeEntry;

use crate::page::{RowPage, SlotRef};
use crate::version::RowVersion;

/// A committed row as seen by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Owning table.
    pub table_id: TableId,
    /// Row key.
    pub row_id: RowId,
    /// Transaction that wrote this version.
    pub txn_id: TxnId,
    /// Commit sequence number.
    pub seq: SeqNo,
    /// Commit time.
    pub commit_ts: Timestamp,
    /// Column values.
    pub values: Arc<Row>,
}

impl Record {
    fn from_version(table_id: TableId, row_id: RowId, version: &RowVersion) -> Option<Self> {
        Some(Self {
            table_id,
            row_id,
            txn_id: version.txn_id,
            seq: version.seq,
            commit_ts: version.commit_ts,
            values: Arc::clone(version.values.as_ref()?),
        })
    }
}

/// Rows of one table, organized in pages.
pub struct RowTable {
    schema: Arc<TableSchema>,
    rows_per_page: usize,
    max_versions: usize,
    directory: DashMap<RowId, SlotRef>,
    pages: RwLock<Vec<Arc<RwLock<RowPage>>>>,
    next_slot: Mutex<SlotRef>,
    live_rows: AtomicU64,
}

impl RowTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(schema: TableSchema, config: &RowStoreConfig) -> Self {
        Self {
            schema: Arc::new(schema),
            rows_per_page: config.rows_per_page.max(1),
            max_versions: config.max_versions_per_row.max(1),
            directory: DashMap::new(),
            pages: RwLock::new(Vec::new()),
            next_slot: Mutex::new(SlotRef { page: 0, slot: 0 }),
            live_rows: AtomicU64::new(0),
        }
    }

    /// Returns the table schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Returns the table id.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.schema.table_id
    }

    fn page(&self, index: u32) -> Option<Arc<RwLock<RowPage>>> {
        self.pages.read().get(index as usize).cloned()
    }

    fn slot_of(&self, row_id: RowId) -> Option<SlotRef> {
        self.directory.get(&row_id).map(|r| *r)
    }

    fn slot_or_allocate(&self, row_id: RowId) -> SlotRef {
        match self.directory.entry(row_id) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let mut next = self.next_slot.lock();
                let slot = *next;
                let page = {
                    let mut pages = self.pages.write();
                    if slot.page as usize == pages.len() {
                        pages.push(Arc::new(RwLock::new(RowPage::new(self.rows_per_page))));
                    }
                    Arc::clone(&pages[slot.page as usize])
                };
                page.write().place(slot.slot as usize, row_id);

                *next = if slot.slot as usize + 1 >= self.rows_per_page {
                    SlotRef {
                        page: slot.page + 1,
                        slot: 0,
                    }
                } else {
                    SlotRef {
                        page: slot.page,
                        slot: slot.slot + 1,
                    }
                };
                entry.insert(slot);
                slot
            }
        }
    }

    /// Installs the version carried by a committed change entry.
    ///
    /// Returns false if the entry is older than the newest installed version.
    pub fn install(&self, entry: &ChangeEntry) -> bool {
        let slot = self.slot_or_allocate(entry.row_id);
        let Some(page) = self.page(slot.page) else {
            return false;
        };
        let mut page = page.write();
        let was_live = page
            .get(slot.slot as usize)
            .map_or(false, |s| s.chain.latest().is_some());

        let version = RowVersion {
            seq: entry.seq,
            txn_id: entry.txn_id,
            commit_ts: entry.commit_ts,
            values: entry.after.clone().map(Arc::new),
        };
        let is_live = !version.is_tombstone();
        let installed = page.install(slot.slot as usize, version, self.max_versions);
        drop(page);

        if installed {
            match (was_live, is_live) {
                (false, true) => {
                    self.live_rows.fetch_add(1, Ordering::Relaxed);
                }
                (true, false) => {
                    self.live_rows.fetch_sub(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
        installed
    }

    /// Returns the newest committed version of a row.
    #[must_use]
    pub fn latest(&self, row_id: RowId) -> Option<Record> {
        let slot = self.slot_of(row_id)?;
        let page = self.page(slot.page)?;
        let page = page.read();
        let version = page.get(slot.slot as usize)?.chain.latest()?;
        Record::from_version(self.id(), row_id, version)
    }

    /// Returns the version of a row visible at `seq`.
    #[must_use]
    pub fn as_of(&self, row_id: RowId, seq: SeqNo) -> Option<Record> {
        let slot = self.slot_of(row_id)?;
        let page = self.page(slot.page)?;
        let page = page.read();
        let version = page.get(slot.slot as usize)?.chain.as_of(seq)?;
        Record::from_version(self.id(), row_id, version)
    }

    /// Returns live rows with keys in `range` that satisfy `predicate`, ordered by key.
    pub fn scan(&self, range: &impl RangeBounds<RowId>, predicate: &BoundPredicate) -> Vec<Record> {
        let pages: Vec<_> = self.pages.read().iter().cloned().collect();
        let mut records = Vec::new();
        for page in pages {
            let page = page.read();
            for slot in page.iter() {
                if !range.contains(&slot.row_id) {
                    continue;
                }
                let Some(version) = slot.chain.latest() else {
                    continue;
                };
                let Some(values) = version.values.as_deref() else {
                    continue;
                };
                if predicate.eval_row(slot.row_id, version.seq, values) {
                    if let Some(record) = Record::from_version(self.id(), slot.row_id, version) {
                        records.push(record);
                    }
                }
            }
        }
        records.sort_by_key(|r| r.row_id);
        records
    }

    /// Returns the number of live rows.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.live_rows.load(Ordering::Relaxed)
    }

    /// Returns the number of allocated pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }
}
