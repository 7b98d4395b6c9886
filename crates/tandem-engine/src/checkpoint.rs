//! Row snapshots and the checkpoint worker.
//!
//! A snapshot holds the newest live version of every row together with the
//! change log position it was taken at. Once one is on disk the log may
//! delete the segments it covers: recovery restores the snapshot and replays
//! only the entries after it.
//!
//! ```text
//! | magic (4) | version (4) | seq (8) | rows (8) | frame * rows | crc32 (4) |
//! ```
//!
//! Frames use the change log codec, so every row image is checksummed twice.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use tandem_column::{ColumnStore, GroupRow};
use tandem_common::types::{Predicate, SeqNo};
use tandem_common::{TandemError, TandemResult};
use tandem_log::frame::{decode_frame, encode_frame, frame_len, FrameRead};
use tandem_log::{ChangeDraft, ChangeEntry, ChangeLog};
use tandem_row::RowStore;

/// File name of the row snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "rows.snapshot";

const SNAPSHOT_MAGIC: u32 = 0x5453_4E50;
const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_HEADER_SIZE: usize = 24;

/// Newest live row images as of a change log position.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Every change at or below this sequence number is reflected.
    pub seq: SeqNo,
    /// One upsert per live row, carrying the row's own commit sequence.
    pub entries: Vec<ChangeEntry>,
}

impl Snapshot {
    /// Captures the row store.
    ///
    /// `seq` is read before the scan, so rows may carry newer versions than
    /// `seq`; replaying the log after `seq` on top of them is idempotent.
    pub fn capture(log: &ChangeLog, rows: &RowStore) -> TandemResult<Self> {
        let seq = log.last_committed();
        let mut entries = Vec::new();
        for schema in rows.schemas() {
            for record in rows.scan_range(schema.table_id, .., &Predicate::True)? {
                let draft = ChangeDraft::upsert(
                    record.table_id,
                    record.row_id,
                    record.txn_id,
                    None,
                    record.values.as_ref().clone(),
                );
                entries.push(draft.into_entry(record.seq, record.commit_ts));
            }
        }
        Ok(Self { seq, entries })
    }

    /// Serializes the snapshot.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self.entries.iter().map(frame_len).sum();
        let mut buf = BytesMut::with_capacity(SNAPSHOT_HEADER_SIZE + body + 4);
        buf.put_u32_le(SNAPSHOT_MAGIC);
        buf.put_u32_le(SNAPSHOT_VERSION);
        buf.put_u64_le(self.seq.as_u64());
        buf.put_u64_le(self.entries.len() as u64);
        for entry in &self.entries {
            encode_frame(entry, &mut buf);
        }
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.to_vec()
    }

    /// Parses a serialized snapshot.
    pub fn decode(data: &[u8]) -> TandemResult<Self> {
        if data.len() < SNAPSHOT_HEADER_SIZE + 4 {
            return Err(TandemError::corruption("row snapshot is truncated"));
        }
        let (body, trailer) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != stored {
            return Err(TandemError::corruption("row snapshot checksum mismatch"));
        }

        let mut header = &body[..SNAPSHOT_HEADER_SIZE];
        if header.get_u32_le() != SNAPSHOT_MAGIC {
            return Err(TandemError::corruption("row snapshot has a bad magic number"));
        }
        let version = header.get_u32_le();
        if version != SNAPSHOT_VERSION {
            return Err(TandemError::corruption(format!(
                "unsupported row snapshot version {}",
                version
            )));
        }
        let seq = SeqNo::new(header.get_u64_le());
        let count = header.get_u64_le() as usize;

        let mut offset = SNAPSHOT_HEADER_SIZE;
        let mut entries = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            match decode_frame(&body[offset..]) {
                FrameRead::Frame { seq, mut payload, len } => {
                    entries.push(ChangeEntry::decode_payload(seq, &mut payload)?);
                    offset += len;
                }
                FrameRead::Incomplete => {
                    return Err(TandemError::corruption("row snapshot ends inside a row"))
                }
                FrameRead::Corrupt(reason) => {
                    return Err(TandemError::corruption(format!("row snapshot: {}", reason)))
                }
            }
        }
        if offset != body.len() {
            return Err(TandemError::corruption("row snapshot has trailing bytes"));
        }
        Ok(Self { seq, entries })
    }

    /// Writes the snapshot into `dir`, replacing the previous one atomically.
    pub fn write(&self, dir: &Path) -> TandemResult<PathBuf> {
        let path = dir.join(SNAPSHOT_FILE);
        let tmp = path.with_extension("snapshot.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&self.encode())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
        Ok(path)
    }

    /// Loads the snapshot kept in `dir`, if there is one.
    pub fn load(dir: &Path) -> TandemResult<Option<Self>> {
        let path = dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)?;
        let snapshot = Self::decode(&data)
            .map_err(|e| TandemError::corruption(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), seq = %snapshot.seq, rows = snapshot.entries.len(), "Loaded row snapshot");
        Ok(Some(snapshot))
    }

    /// Installs the snapshot rows and returns the highest transaction id seen.
    pub fn restore(&self, rows: &RowStore) -> TandemResult<u64> {
        let mut max_txn = 0;
        for entry in &self.entries {
            rows.replay(entry)?;
            max_txn = max_txn.max(entry.txn_id.as_u64());
        }
        Ok(max_txn)
    }
}

/// Rebuilds columnar tables from the current row store contents.
///
/// Rows are grouped in commit order, `batch_rows` per group, and the last
/// group of each table ends at `through`, which becomes the watermark.
pub fn seed_columns(
    rows: &RowStore,
    columns: &ColumnStore,
    through: SeqNo,
    batch_rows: usize,
) -> TandemResult<usize> {
    let mut published = 0;
    for schema in rows.schemas() {
        let table = schema.table_id;
        let mut records = rows.scan_range(table, .., &Predicate::True)?;
        records.sort_by_key(|r| r.seq);
        let chunks: Vec<_> = records.chunks(batch_rows.max(1)).collect();
        let mut first = SeqNo::FIRST;
        for (index, chunk) in chunks.iter().enumerate() {
            let last = match chunk.last() {
                Some(record) if index + 1 < chunks.len() => record.seq,
                _ => through,
            };
            let group_rows: Vec<GroupRow> = chunk
                .iter()
                .map(|r| GroupRow {
                    row_id: r.row_id,
                    seq: r.seq,
                    values: Arc::clone(&r.values),
                })
                .collect();
            let group = columns.build_group(table, first, last, &group_rows, Vec::new())?;
            if columns.publish(group)? {
                published += 1;
            }
            first = last.next();
        }
    }
    columns.advance_watermark(through);
    debug!(groups = published, watermark = %through, "Seeded columnar store from rows");
    Ok(published)
}

/// Takes snapshots and lets the change log purge what they cover.
pub struct Checkpointer {
    dir: PathBuf,
    log: Arc<ChangeLog>,
    rows: Arc<RowStore>,
    columns: Arc<ColumnStore>,
    running: Mutex<()>,
}

impl Checkpointer {
    /// Creates a checkpointer writing into `dir`.
    #[must_use]
    pub fn new(dir: PathBuf, log: Arc<ChangeLog>, rows: Arc<RowStore>, columns: Arc<ColumnStore>) -> Self {
        Self {
            dir,
            log,
            rows,
            columns,
            running: Mutex::new(()),
        }
    }

    /// Writes a snapshot, marks it in the log and releases covered segments.
    ///
    /// Returns the snapshot position.
    pub fn run(&self) -> TandemResult<SeqNo> {
        let _running = self.running.lock();
        let snapshot = Snapshot::capture(&self.log, &self.rows)?;
        let path = snapshot.write(&self.dir)?;
        self.log.mark_checkpoint(snapshot.seq);
        self.log.truncate(self.columns.watermark())?;
        info!(
            path = %path.display(),
            seq = %snapshot.seq,
            rows = snapshot.entries.len(),
            segments = self.log.segment_count(),
            "Wrote row snapshot"
        );
        Ok(snapshot.seq)
    }
}

/// Runs [`Checkpointer::run`] every interval until shut down.
pub struct CheckpointWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CheckpointWorker {
    /// Starts the worker thread.
    pub fn spawn(checkpointer: Arc<Checkpointer>, interval: Duration) -> TandemResult<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("tandem-checkpoint".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "Checkpoint worker started");
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(err) = checkpointer.run() {
                                warn!(error = %err, "Checkpoint failed");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Checkpoint worker stopped");
            })?;
        Ok(Self {
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Checkpoint worker panicked");
            }
        }
    }
}

impl Drop for CheckpointWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::config::{ChangeLogConfig, ColumnStoreConfig, RowStoreConfig};
    use tandem_common::types::{ColumnDef, ColumnType, RowId, TableId, TableSchema, TxnId, Value};

    fn stores() -> (Arc<ChangeLog>, RowStore, TableId) {
        let log = Arc::new(ChangeLog::in_memory(ChangeLogConfig::default()));
        let rows = RowStore::new(RowStoreConfig::default(), Arc::clone(&log));
        let schema = TableSchema::new(TableId::new(1), "t", vec![ColumnDef::new("v", ColumnType::Int64)]).unwrap();
        rows.create_table(schema).unwrap();
        (log, rows, TableId::new(1))
    }

    #[test]
    fn test_snapshot_restores_live_rows() {
        let (log, rows, table) = stores();
        for i in 1..=10u64 {
            rows.put(table, RowId::new(i), vec![Value::Int64(i as i64)], TxnId::new(i)).unwrap();
        }
        rows.put(table, RowId::new(3), vec![Value::Int64(33)], TxnId::new(11)).unwrap();
        rows.delete(table, RowId::new(4), TxnId::new(12)).unwrap();

        let snapshot = Snapshot::capture(&log, &rows).unwrap();
        assert_eq!(snapshot.seq, SeqNo::new(12));
        assert_eq!(snapshot.entries.len(), 9);
        let decoded = Snapshot::decode(&snapshot.encode()).unwrap();
        assert_eq!(decoded, snapshot);

        let (_, fresh, _) = stores();
        assert_eq!(decoded.restore(&fresh).unwrap(), 11);
        assert_eq!(fresh.get(table, RowId::new(3)).unwrap().values[0], Value::Int64(33));
        assert_eq!(fresh.get(table, RowId::new(3)).unwrap().seq, SeqNo::new(11));
        assert!(fresh.get(table, RowId::new(4)).is_err());
    }

    #[test]
    fn test_damaged_snapshot_is_corruption() {
        let (log, rows, table) = stores();
        rows.put(table, RowId::new(1), vec![Value::Int64(1)], TxnId::new(1)).unwrap();
        let mut bytes = Snapshot::capture(&log, &rows).unwrap().encode();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        assert!(matches!(Snapshot::decode(&bytes), Err(TandemError::Corruption { .. })));
        assert!(Snapshot::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_seed_columns_groups_in_commit_order() {
        let (log, rows, table) = stores();
        for i in (1..=25u64).rev() {
            rows.put(table, RowId::new(i), vec![Value::Int64(1)], TxnId::new(i)).unwrap();
        }
        let columns = ColumnStore::new(ColumnStoreConfig::default(), SeqNo::ZERO);
        columns.create_table(Arc::clone(rows.table(table).unwrap().schema())).unwrap();

        let groups = seed_columns(&rows, &columns, log.last_committed(), 10).unwrap();
        assert_eq!(groups, 3);
        assert_eq!(columns.watermark(), SeqNo::new(25));
        assert_eq!(columns.snapshot(table).unwrap().live_rows(), 25);
    }
}
