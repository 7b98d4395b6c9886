//! The synchronizer.
//!
//! One round drains the change log cursor, folds the entries into per-table
//! open batches, seals batches that are full or old enough, publishes the
//! sealed ones in sequence order and then moves the columnar watermark up to
//! the highest sequence number below which nothing is still buffered.
//!
//! A batch that fails to encode or publish stays queued and is retried in
//! the next round from the same entries. Later batches of the same table
//! wait behind it, so groups are always published in sequence order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use tandem_column::ColumnStore;
use tandem_common::config::SyncConfig;
use tandem_common::types::{SeqNo, TableId};
use tandem_common::{TandemError, TandemResult};
use tandem_log::{ChangeLog, Cursor};

use crate::batch::{OpenBatch, SealedBatch};
use crate::encoder::{BatchEncoder, ColumnEncoder};

/// Name of the change log cursor owned by the synchronizer.
pub const SYNC_CURSOR: &str = "columnar-sync";

/// Outcome of one synchronization round.
#[derive(Debug, Default)]
pub struct SyncRound {
    /// Entries read from the change log.
    pub entries: usize,
    /// Batches sealed this round.
    pub sealed: usize,
    /// Chunk groups published.
    pub published: usize,
    /// Rows carried by the published groups.
    pub rows: usize,
    /// Chunk groups replaced by compaction.
    pub compacted: usize,
    /// Watermark after the round.
    pub watermark: SeqNo,
    /// First encode or publish error of the round, if any.
    pub error: Option<TandemError>,
}

/// Synchronizer counters.
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Rounds run.
    pub rounds: AtomicU64,
    /// Entries read from the change log.
    pub entries: AtomicU64,
    /// Chunk groups published.
    pub published: AtomicU64,
    /// Rows published.
    pub rows: AtomicU64,
    /// Failed encode or publish attempts.
    pub failures: AtomicU64,
    /// Chunk groups replaced by compaction.
    pub compacted: AtomicU64,
    /// Batches open or waiting to publish after the last round.
    pub buffered_batches: AtomicU64,
}

/// Point-in-time view of the synchronizer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncStatsSnapshot {
    /// Rounds run.
    pub rounds: u64,
    /// Entries read from the change log.
    pub entries: u64,
    /// Chunk groups published.
    pub published: u64,
    /// Rows published.
    pub rows: u64,
    /// Failed encode or publish attempts.
    pub failures: u64,
    /// Chunk groups replaced by compaction.
    pub compacted: u64,
    /// Batches open or waiting to publish.
    pub buffered_batches: u64,
    /// Consecutive failed rounds.
    pub consecutive_failures: u32,
    /// Set once consecutive failures reach the retry budget.
    pub alarm: bool,
    /// Set once a sequence gap stopped the synchronizer.
    pub halted: bool,
    /// Columnar watermark.
    pub watermark: SeqNo,
    /// Committed entries not yet visible to columnar reads.
    pub lag: u64,
}

struct SyncState {
    cursor: Cursor,
    open: BTreeMap<TableId, OpenBatch>,
    sealed: BTreeMap<TableId, VecDeque<SealedBatch>>,
    halt: Option<(SeqNo, SeqNo)>,
}

impl SyncState {
    fn oldest_buffered(&self) -> Option<SeqNo> {
        let open = self.open.values().map(OpenBatch::first_seq);
        let sealed = self.sealed.values().filter_map(|q| q.front()).map(|b| b.first_seq);
        open.chain(sealed).min()
    }

    fn buffered(&self) -> usize {
        self.open.len() + self.sealed.values().map(VecDeque::len).sum::<usize>()
    }
}

/// Moves committed changes from the change log into the columnar store.
pub struct Synchronizer {
    config: SyncConfig,
    log: Arc<ChangeLog>,
    store: Arc<ColumnStore>,
    encoder: Box<dyn BatchEncoder>,
    state: Mutex<SyncState>,
    consecutive_failures: AtomicU32,
    alarm: AtomicBool,
    halted: AtomicBool,
    stats: SyncStats,
}

impl Synchronizer {
    /// Creates a synchronizer that resumes after the store's watermark.
    pub fn new(config: SyncConfig, log: Arc<ChangeLog>, store: Arc<ColumnStore>) -> TandemResult<Self> {
        let encoder = Box::new(ColumnEncoder::new(Arc::clone(&store)));
        Self::with_encoder(config, log, store, encoder)
    }

    /// Creates a synchronizer with a custom batch encoder.
    pub fn with_encoder(
        config: SyncConfig,
        log: Arc<ChangeLog>,
        store: Arc<ColumnStore>,
        encoder: Box<dyn BatchEncoder>,
    ) -> TandemResult<Self> {
        let cursor = log.register_cursor(SYNC_CURSOR, Some(store.watermark()))?;
        info!(resume_after = %cursor.position(), "Synchronizer attached to change log");
        Ok(Self {
            config,
            log,
            store,
            encoder,
            state: Mutex::new(SyncState {
                cursor,
                open: BTreeMap::new(),
                sealed: BTreeMap::new(),
                halt: None,
            }),
            consecutive_failures: AtomicU32::new(0),
            alarm: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            stats: SyncStats::default(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns true once a sequence gap stopped the synchronizer.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Returns true while the failure alarm is raised.
    #[must_use]
    pub fn is_alarmed(&self) -> bool {
        self.alarm.load(Ordering::Acquire)
    }

    /// Runs one round, sealing only batches that are full or old enough.
    pub fn run_once(&self) -> TandemResult<SyncRound> {
        self.round(false)
    }

    /// Publishes everything committed so far.
    ///
    /// Seals every open batch and repeats rounds until the watermark covers
    /// the last sequence number committed when the call started. Returns
    /// the watermark, or the first error that kept a batch from publishing.
    pub fn flush(&self) -> TandemResult<SeqNo> {
        let target = self.log.last_committed();
        loop {
            let round = self.round(true)?;
            if let Some(err) = round.error {
                return Err(err);
            }
            if round.watermark >= target || round.entries == 0 {
                return Ok(round.watermark);
            }
        }
    }

    fn round(&self, force: bool) -> TandemResult<SyncRound> {
        let mut state = self.state.lock();
        if let Some((expected, found)) = state.halt {
            return Err(TandemError::SequenceGap { expected, found });
        }
        self.stats.rounds.fetch_add(1, Ordering::Relaxed);
        let mut round = SyncRound::default();

        let entries = match self.log.read_cursor(&state.cursor, self.config.read_batch) {
            Ok(entries) => entries,
            Err(TandemError::SequenceGap { expected, found }) => {
                state.halt = Some((expected, found));
                self.halted.store(true, Ordering::Release);
                error!(%expected, %found, "Change log gap, synchronizer halted");
                return Err(TandemError::SequenceGap { expected, found });
            }
            Err(err) => return Err(err),
        };
        round.entries = entries.len();
        self.stats
            .entries
            .fetch_add(entries.len() as u64, Ordering::Relaxed);

        let max_rows = self.config.batch_max_rows;
        let SyncState { open, sealed, halt, .. } = &mut *state;
        for entry in entries {
            let table_id = entry.table_id;
            match open.get_mut(&table_id) {
                Some(batch) => {
                    let (expected, found) = (batch.last_seq().next(), entry.seq);
                    if let Err(err) = batch.push(entry) {
                        // The cursor already moved past this entry.
                        *halt = Some((expected, found));
                        self.halted.store(true, Ordering::Release);
                        error!(%expected, %found, error = %err, "Out of order change entry, synchronizer halted");
                        return Err(TandemError::SequenceGap { expected, found });
                    }
                }
                None => {
                    open.insert(table_id, OpenBatch::new(entry));
                }
            }
            if open.get(&table_id).map_or(false, |b| b.entries() >= max_rows) {
                if let Some(batch) = open.remove(&table_id) {
                    sealed.entry(table_id).or_default().push_back(batch.seal());
                    round.sealed += 1;
                }
            }
        }

        let max_age = self.config.batch_max_age();
        let due: Vec<TableId> = open
            .iter()
            .filter(|(_, b)| force || b.is_full(max_rows, max_age))
            .map(|(t, _)| *t)
            .collect();
        for table_id in due {
            if let Some(batch) = open.remove(&table_id) {
                sealed.entry(table_id).or_default().push_back(batch.seal());
                round.sealed += 1;
            }
        }

        let mut touched = Vec::new();
        for (table_id, queue) in sealed.iter_mut() {
            let published_before = round.published;
            while let Some(batch) = queue.front() {
                match self.encoder.encode(batch).and_then(|g| self.store.publish(g)) {
                    Ok(fresh) => {
                        if fresh {
                            round.published += 1;
                            round.rows += batch.rows.len();
                        }
                        debug!(
                            table = %table_id,
                            first_seq = %batch.first_seq,
                            last_seq = %batch.last_seq,
                            rows = batch.rows.len(),
                            deleted = batch.deleted.len(),
                            "Published batch"
                        );
                        queue.pop_front();
                    }
                    Err(err) => {
                        warn!(
                            table = %table_id,
                            first_seq = %batch.first_seq,
                            error = %err,
                            "Failed to publish batch, will retry"
                        );
                        self.stats.failures.fetch_add(1, Ordering::Relaxed);
                        round.error.get_or_insert(err);
                        break;
                    }
                }
            }
            if round.published > published_before {
                touched.push(*table_id);
            }
        }
        sealed.retain(|_, queue| !queue.is_empty());
        self.stats
            .published
            .fetch_add(round.published as u64, Ordering::Relaxed);
        self.stats
            .rows
            .fetch_add(round.rows as u64, Ordering::Relaxed);
        self.track_failures(round.error.is_some());

        let drained = state.cursor.position();
        let target = state
            .oldest_buffered()
            .map_or(drained, |first| first.prev().min(drained));
        round.watermark = self.store.advance_watermark(target);
        self.log.ack(&state.cursor, round.watermark);
        if let Err(err) = self.log.truncate(round.watermark) {
            warn!(error = %err, "Change log truncation failed");
        }
        self.stats
            .buffered_batches
            .store(state.buffered() as u64, Ordering::Relaxed);
        drop(state);

        if self.config.compaction {
            for table_id in touched {
                match self.store.compact(table_id) {
                    Ok(replaced) => round.compacted += replaced,
                    Err(err) => warn!(table = %table_id, error = %err, "Compaction failed"),
                }
            }
            self.stats
                .compacted
                .fetch_add(round.compacted as u64, Ordering::Relaxed);
        }
        Ok(round)
    }

    fn track_failures(&self, failed: bool) {
        if !failed {
            self.consecutive_failures.store(0, Ordering::Release);
            if self.alarm.swap(false, Ordering::AcqRel) {
                info!("Synchronizer recovered, alarm cleared");
            }
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.retry_budget && !self.alarm.swap(true, Ordering::AcqRel) {
            error!(
                failures,
                budget = self.config.retry_budget,
                "Synchronizer retry budget exhausted, watermark is held"
            );
        }
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> SyncStatsSnapshot {
        let watermark = self.store.watermark();
        SyncStatsSnapshot {
            rounds: self.stats.rounds.load(Ordering::Relaxed),
            entries: self.stats.entries.load(Ordering::Relaxed),
            published: self.stats.published.load(Ordering::Relaxed),
            rows: self.stats.rows.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            compacted: self.stats.compacted.load(Ordering::Relaxed),
            buffered_batches: self.stats.buffered_batches.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            alarm: self.is_alarmed(),
            halted: self.is_halted(),
            watermark,
            lag: self.log.last_committed().distance_from(watermark),
        }
    }
}
