//! Per-row write latches.
//!
//! Latches are granted in arrival order. Each row that has a holder or
//! waiters gets an entry in one of [`LATCH_SHARDS`] shards; rows in
//! different shards never touch the same mutex. A waiter that times out
//! leaves the queue and wakes the rest so the next in line can proceed.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use tandem_common::constants::LATCH_SHARDS;
use tandem_common::types::{RowId, TableId};
use tandem_common::{TandemError, TandemResult};

type RowKey = (TableId, RowId);

#[derive(Default)]
struct LatchEntry {
    holder: Option<u64>,
    queue: VecDeque<u64>,
}

#[derive(Default)]
struct Shard {
    latches: Mutex<HashMap<RowKey, LatchEntry>>,
    released: Condvar,
}

/// Statistics about row latches.
#[derive(Debug, Default)]
pub struct LatchStats {
    /// Latches granted.
    pub acquisitions: AtomicU64,
    /// Acquisitions that had to wait.
    pub waits: AtomicU64,
    /// Acquisitions abandoned after the timeout.
    pub timeouts: AtomicU64,
}

impl LatchStats {
    /// Records a grant.
    pub fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a wait.
    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a timeout.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Table of FIFO row latches.
pub struct RowLatchTable {
    shards: Vec<Shard>,
    next_ticket: AtomicU64,
    stats: LatchStats,
}

impl RowLatchTable {
    /// Creates an empty latch table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..LATCH_SHARDS).map(|_| Shard::default()).collect(),
            next_ticket: AtomicU64::new(1),
            stats: LatchStats::default(),
        }
    }

    fn shard(&self, key: &RowKey) -> &Shard {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Acquires the latch of one row, waiting at most `timeout`.
    pub fn acquire(
        &self,
        table_id: TableId,
        row_id: RowId,
        timeout: Duration,
    ) -> TandemResult<RowLatchGuard<'_>> {
        let key = (table_id, row_id);
        let shard = self.shard(&key);
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut latches = shard.latches.lock();

        let entry = latches.entry(key).or_default();
        if entry.holder.is_none() && entry.queue.is_empty() {
            entry.holder = Some(ticket);
            self.stats.record_acquisition();
            return Ok(RowLatchGuard {
                table: self,
                key,
                ticket,
            });
        }

        entry.queue.push_back(ticket);
        self.stats.record_wait();
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let granted = match latches.get_mut(&key) {
                Some(entry) if entry.holder.is_none() && entry.queue.front() == Some(&ticket) => {
                    entry.queue.pop_front();
                    entry.holder = Some(ticket);
                    true
                }
                _ => false,
            };
            if granted {
                self.stats.record_acquisition();
                return Ok(RowLatchGuard {
                    table: self,
                    key,
                    ticket,
                });
            }

            if shard.released.wait_until(&mut latches, deadline).timed_out() {
                // One last look: the latch may have been handed over just now.
                if let Some(entry) = latches.get_mut(&key) {
                    if entry.holder.is_none() && entry.queue.front() == Some(&ticket) {
                        entry.queue.pop_front();
                        entry.holder = Some(ticket);
                        self.stats.record_acquisition();
                        return Ok(RowLatchGuard {
                            table: self,
                            key,
                            ticket,
                        });
                    }
                    entry.queue.retain(|t| *t != ticket);
                    if entry.holder.is_none() && entry.queue.is_empty() {
                        latches.remove(&key);
                    }
                }
                drop(latches);
                shard.released.notify_all();
                self.stats.record_timeout();
                return Err(TandemError::LockTimeout {
                    table_id,
                    row_id,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    }

    fn release(&self, key: RowKey, ticket: u64) {
        let shard = self.shard(&key);
        let mut latches = shard.latches.lock();
        if let Some(entry) = latches.get_mut(&key) {
            if entry.holder == Some(ticket) {
                entry.holder = None;
                if entry.queue.is_empty() {
                    latches.remove(&key);
                    return;
                }
            }
        }
        drop(latches);
        shard.released.notify_all();
    }

    /// Returns the number of rows currently latched or waited on.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shards.iter().map(|s| s.latches.lock().len()).sum()
    }

    /// Returns the statistics.
    #[must_use]
    pub fn stats(&self) -> &LatchStats {
        &self.stats
    }
}

impl Default for RowLatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a row latch until dropped.
pub struct RowLatchGuard<'a> {
    table: &'a RowLatchTable,
    key: RowKey,
    ticket: u64,
}

impl RowLatchGuard<'_> {
    /// Returns the latched row.
    #[must_use]
    pub fn row_id(&self) -> RowId {
        self.key.1
    }
}

impl Drop for RowLatchGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.key, self.ticket);
    }
}

impl std::fmt::Debug for RowLatchGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLatchGuard")
            .field("table_id", &self.key.0)
            .field("row_id", &self.key.1)
            .finish()
    }
}
