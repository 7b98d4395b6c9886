//! The change log.
//!
//! Appends are serialized by the commit mutex, which also covers the
//! caller-supplied install step, so row versions become visible in sequence
//! order and only after their entry is in the log. Retained entries live in
//! an in-memory deque indexed by `seq - first_retained`; readers take its
//! read lock only long enough to clone `Arc`s out.
//!
//! Segment files are only purged up to the last checkpoint, the highest
//! sequence number whose effects an external snapshot has made durable.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use tandem_common::config::ChangeLogConfig;
use tandem_common::constants::MAX_CHANGE_ENTRY_SIZE;
use tandem_common::types::{SeqNo, Timestamp};
use tandem_common::{TandemError, TandemResult};

use crate::cursor::{Cursor, CursorState};
use crate::durable::DurableLog;
use crate::entry::{ChangeDraft, ChangeEntry};

const ITER_FETCH: usize = 256;

/// Change log statistics.
#[derive(Debug, Default)]
pub struct LogStats {
    /// Entries appended.
    pub appends: AtomicU64,
    /// Payload bytes appended.
    pub bytes_appended: AtomicU64,
    /// Appends that failed before an entry was installed.
    pub failed_appends: AtomicU64,
    /// Entries released by retention.
    pub truncated: AtomicU64,
    /// Segment files deleted by retention.
    pub purged_segments: AtomicU64,
}

impl LogStats {
    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> LogStatsSnapshot {
        LogStatsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            failed_appends: self.failed_appends.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            purged_segments: self.purged_segments.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`LogStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStatsSnapshot {
    /// Entries appended.
    pub appends: u64,
    /// Payload bytes appended.
    pub bytes_appended: u64,
    /// Appends that failed before an entry was installed.
    pub failed_appends: u64,
    /// Entries released by retention.
    pub truncated: u64,
    /// Segment files deleted by retention.
    pub purged_segments: u64,
}

struct CommitState {
    next_seq: SeqNo,
    durable: Option<DurableLog>,
}

/// Append-only log of committed row mutations.
///
/// # Example
///
/// ```rust
/// use tandem_common::config::ChangeLogConfig;
/// use tandem_common::types::{RowId, SeqNo, TableId, TxnId, Value};
/// use tandem_log::{ChangeDraft, ChangeLog};
///
/// let log = ChangeLog::in_memory(ChangeLogConfig::default());
/// let cursor = log.register_cursor("sync", None).unwrap();
///
/// let draft = ChangeDraft::upsert(TableId::new(1), RowId::new(7), TxnId::new(1), None, vec![Value::Int64(1)]);
/// let seq = log.append(draft).unwrap();
/// assert_eq!(seq, SeqNo::new(1));
///
/// let batch = log.read_cursor(&cursor, 16).unwrap();
/// assert_eq!(batch.len(), 1);
/// ```
pub struct ChangeLog {
    config: ChangeLogConfig,
    commit: Mutex<CommitState>,
    entries: RwLock<VecDeque<Arc<ChangeEntry>>>,
    /// Sequence number of `entries[0]`; the next sequence number when empty.
    first_retained: AtomicU64,
    last_committed: AtomicU64,
    checkpointed: AtomicU64,
    cursors: RwLock<BTreeMap<String, Arc<CursorState>>>,
    closed: AtomicBool,
    stats: LogStats,
}

impl ChangeLog {
    /// Creates a log that lives only in memory.
    #[must_use]
    pub fn in_memory(config: ChangeLogConfig) -> Self {
        let next = SeqNo::new(config.initial_seq.max(1));
        Self::with_state(config, next, None, VecDeque::new())
    }

    /// Opens a durable log in `dir`, recovering its retained entries.
    ///
    /// Recovered entries are readable through [`ChangeLog::read_from`] starting
    /// at [`ChangeLog::first_retained`].
    pub fn open(dir: &Path, config: ChangeLogConfig) -> TandemResult<Self> {
        let (durable, recovered) = DurableLog::open(dir, &config)?;
        let next = recovered
            .last()
            .map(|e| e.seq.next())
            .or_else(|| durable.next_seq_hint())
            .unwrap_or(SeqNo::new(config.initial_seq.max(1)));
        let entries: VecDeque<_> = recovered.into_iter().map(Arc::new).collect();
        info!(
            dir = %dir.display(),
            retained = entries.len(),
            next_seq = %next,
            "Opened durable change log"
        );
        Ok(Self::with_state(config, next, Some(durable), entries))
    }

    fn with_state(
        config: ChangeLogConfig,
        next: SeqNo,
        durable: Option<DurableLog>,
        entries: VecDeque<Arc<ChangeEntry>>,
    ) -> Self {
        let first = entries.front().map_or(next, |e| e.seq);
        Self {
            config,
            commit: Mutex::new(CommitState {
                next_seq: next,
                durable,
            }),
            entries: RwLock::new(entries),
            first_retained: AtomicU64::new(first.as_u64()),
            last_committed: AtomicU64::new(next.prev().as_u64()),
            checkpointed: AtomicU64::new(0),
            cursors: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            stats: LogStats::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ChangeLogConfig {
        &self.config
    }

    /// Returns true if entries are written to segment files.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.commit.lock().durable.is_some()
    }

    /// Appends a mutation and returns its sequence number.
    pub fn append(&self, draft: ChangeDraft) -> TandemResult<SeqNo> {
        self.append_with(draft, |_| ()).map(|(entry, ())| entry.seq)
    }

    /// Appends a mutation and runs `install` inside the commit section.
    ///
    /// `install` runs after the entry is durable (when durability is
    /// configured) and before it becomes observable to cursors and
    /// [`ChangeLog::last_committed`]. If the append fails, `install` never
    /// runs and no sequence number is consumed.
    pub fn append_with<T>(
        &self,
        draft: ChangeDraft,
        install: impl FnOnce(&Arc<ChangeEntry>) -> T,
    ) -> TandemResult<(Arc<ChangeEntry>, T)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TandemError::Closed);
        }

        let mut commit = self.commit.lock();
        let seq = commit.next_seq;
        let entry = Arc::new(draft.into_entry(seq, Timestamp::now()));
        let size = entry.payload_len();
        if size > MAX_CHANGE_ENTRY_SIZE {
            self.stats.failed_appends.fetch_add(1, Ordering::Relaxed);
            return Err(TandemError::schema_mismatch(format!(
                "row image of {} bytes exceeds the {} byte limit",
                size, MAX_CHANGE_ENTRY_SIZE
            )));
        }

        if let Some(durable) = commit.durable.as_mut() {
            if let Err(e) = durable.append(&entry) {
                self.stats.failed_appends.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        }

        let installed = install(&entry);

        self.entries.write().push_back(Arc::clone(&entry));
        self.last_committed.store(seq.as_u64(), Ordering::Release);
        commit.next_seq = seq.next();
        drop(commit);

        self.stats.appends.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_appended
            .fetch_add(size as u64, Ordering::Relaxed);
        Ok((entry, installed))
    }

    /// Returns the latest committed sequence number (`initial_seq - 1` for an empty log).
    #[must_use]
    pub fn last_committed(&self) -> SeqNo {
        SeqNo::new(self.last_committed.load(Ordering::Acquire))
    }

    /// Returns the oldest retained sequence number.
    #[must_use]
    pub fn first_retained(&self) -> SeqNo {
        SeqNo::new(self.first_retained.load(Ordering::Acquire))
    }

    /// Returns the number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no entries are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copies up to `max` entries starting at `from`.
    ///
    /// Fails with `SequenceGap` if `from` has already been discarded.
    pub fn fetch(&self, from: SeqNo, max: usize) -> TandemResult<Vec<Arc<ChangeEntry>>> {
        let entries = self.entries.read();
        let first = self.first_retained();
        if from < first {
            return Err(TandemError::SequenceGap {
                expected: from,
                found: first,
            });
        }
        let start = from.distance_from(first) as usize;
        let batch: Vec<_> = entries.iter().skip(start).take(max).cloned().collect();
        drop(entries);

        let mut expected = from;
        for entry in &batch {
            if entry.seq != expected {
                return Err(TandemError::SequenceGap {
                    expected,
                    found: entry.seq,
                });
            }
            expected = expected.next();
        }
        Ok(batch)
    }

    /// Returns a lazy iterator over entries starting at `from`.
    ///
    /// The iterator observes entries appended while it is being consumed and
    /// ends when it catches up with the log.
    #[must_use]
    pub fn read_from(&self, from: SeqNo) -> LogIter<'_> {
        LogIter {
            log: self,
            next: from,
            buffer: VecDeque::new(),
            failed: false,
        }
    }

    /// Registers a named cursor, or re-attaches to an existing one.
    ///
    /// `start_after` positions the cursor just after that sequence number
    /// (for example the last acknowledged position of a restarted consumer).
    /// Without it a new cursor starts at the oldest retained entry and an
    /// existing one resumes after its acknowledged position.
    pub fn register_cursor(&self, name: &str, start_after: Option<SeqNo>) -> TandemResult<Cursor> {
        let mut cursors = self.cursors.write();
        let state = match cursors.get(name) {
            Some(state) => {
                let resume = start_after
                    .unwrap_or_else(|| SeqNo::new(state.acked.load(Ordering::Acquire)));
                state.position.store(resume.as_u64(), Ordering::Release);
                state.acked.store(resume.as_u64(), Ordering::Release);
                Arc::clone(state)
            }
            None => {
                let start = start_after.unwrap_or_else(|| self.first_retained().prev());
                let state = Arc::new(CursorState::new(start));
                cursors.insert(name.to_string(), Arc::clone(&state));
                state
            }
        };
        debug!(cursor = name, position = state.position.load(Ordering::Relaxed), "Registered change log cursor");
        Ok(Cursor::new(name, state))
    }

    /// Removes a cursor so it no longer holds back retention.
    pub fn drop_cursor(&self, name: &str) -> bool {
        match self.cursors.write().remove(name) {
            Some(state) => {
                state.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Reads up to `max` entries after the cursor position and advances it.
    pub fn read_cursor(&self, cursor: &Cursor, max: usize) -> TandemResult<Vec<Arc<ChangeEntry>>> {
        if !cursor.is_active() {
            return Err(TandemError::internal(format!(
                "cursor '{}' was dropped",
                cursor.name()
            )));
        }
        let batch = self.fetch(cursor.position().next(), max)?;
        if let Some(last) = batch.last() {
            cursor
                .state
                .position
                .store(last.seq.as_u64(), Ordering::Release);
        }
        Ok(batch)
    }

    /// Acknowledges everything up to `seq` for `cursor`.
    pub fn ack(&self, cursor: &Cursor, seq: SeqNo) {
        let bounded = seq.min(cursor.position());
        cursor
            .state
            .acked
            .fetch_max(bounded.as_u64(), Ordering::AcqRel);
    }

    /// Returns the slowest acknowledged position among active cursors.
    #[must_use]
    pub fn slowest_cursor(&self) -> Option<SeqNo> {
        self.cursors
            .read()
            .values()
            .map(|s| SeqNo::new(s.acked.load(Ordering::Acquire)))
            .min()
    }

    /// Records that every entry up to `seq` is covered by a durable snapshot.
    ///
    /// Segment purging never passes this point.
    pub fn mark_checkpoint(&self, seq: SeqNo) {
        let seq = seq.min(self.last_committed());
        let previous = self.checkpointed.fetch_max(seq.as_u64(), Ordering::AcqRel);
        if seq.as_u64() > previous {
            debug!(checkpoint = %seq, "Marked change log checkpoint");
        }
    }

    /// Returns the last checkpointed sequence number.
    #[must_use]
    pub fn checkpointed(&self) -> SeqNo {
        SeqNo::new(self.checkpointed.load(Ordering::Acquire))
    }

    /// Continues numbering after a snapshot taken at `seq`.
    ///
    /// Used on recovery when the snapshot is newer than anything the log
    /// retained. Retained entries at or below `seq` are released, since the
    /// snapshot already holds their effects. Does nothing if the log is
    /// already past `seq`.
    pub fn resume_after(&self, seq: SeqNo) {
        let mut commit = self.commit.lock();
        if commit.next_seq > seq {
            return;
        }
        let mut entries = self.entries.write();
        let released = entries.len();
        entries.clear();
        commit.next_seq = seq.next();
        self.first_retained.store(seq.next().as_u64(), Ordering::Release);
        self.last_committed.store(seq.as_u64(), Ordering::Release);
        self.checkpointed.fetch_max(seq.as_u64(), Ordering::AcqRel);
        info!(resume_after = %seq, released, "Change log resumed after snapshot");
    }

    /// Discards entries no reader still needs.
    ///
    /// An entry is released when the watermark has passed it and either every
    /// cursor acknowledged it or it is older than the retention horizon.
    /// Returns the number of released entries.
    pub fn truncate(&self, watermark: SeqNo) -> TandemResult<usize> {
        let last = self.last_committed();
        let mut safe = watermark.min(last);
        if let Some(slowest) = self.slowest_cursor() {
            let mut released = slowest;
            if let Some(horizon) = self.config.retention_horizon {
                released = released.max(SeqNo::new(last.as_u64().saturating_sub(horizon)));
            }
            safe = safe.min(released);
        }

        let released = {
            let mut entries = self.entries.write();
            let mut released = 0;
            while entries.front().map_or(false, |e| e.seq <= safe) {
                entries.pop_front();
                released += 1;
            }
            let first = entries.front().map_or(last.next(), |e| e.seq);
            self.first_retained.store(first.as_u64(), Ordering::Release);
            released
        };

        if released > 0 {
            self.stats
                .truncated
                .fetch_add(released as u64, Ordering::Relaxed);
            debug!(released, through = %safe, "Released change log entries");
        }

        if self.config.purge_segments {
            let through = safe.min(self.checkpointed());
            let mut commit = self.commit.lock();
            if let Some(durable) = commit.durable.as_mut() {
                let purged = durable.purge_through(through)?;
                self.stats
                    .purged_segments
                    .fetch_add(purged as u64, Ordering::Relaxed);
            }
        }
        Ok(released)
    }

    /// Flushes durable segments.
    pub fn sync(&self) -> TandemResult<()> {
        match &self.commit.lock().durable {
            Some(durable) => durable.sync(),
            None => Ok(()),
        }
    }

    /// Returns the number of segment files (zero for an in-memory log).
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.commit
            .lock()
            .durable
            .as_ref()
            .map_or(0, DurableLog::segment_count)
    }

    /// Rejects further appends and flushes durable state.
    pub fn close(&self) -> TandemResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sync()?;
        info!(last_committed = %self.last_committed(), "Closed change log");
        Ok(())
    }

    /// Returns true once [`ChangeLog::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }
}

/// Lazy, restartable iterator over change entries.
pub struct LogIter<'a> {
    log: &'a ChangeLog,
    next: SeqNo,
    buffer: VecDeque<Arc<ChangeEntry>>,
    failed: bool,
}

impl LogIter<'_> {
    /// Returns the sequence number the iterator will yield next.
    #[must_use]
    pub fn position(&self) -> SeqNo {
        self.buffer.front().map_or(self.next, |e| e.seq)
    }
}

impl Iterator for LogIter<'_> {
    type Item = TandemResult<Arc<ChangeEntry>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() {
            match self.log.fetch(self.next, ITER_FETCH) {
                Ok(batch) => {
                    if let Some(last) = batch.last() {
                        self.next = last.seq.next();
                    }
                    self.buffer.extend(batch);
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
