//! Resource governor.
//!
//! Work is admitted into one of two slot pools. Transactional work may
//! borrow idle analytical slots; analytical work never exceeds its own pool
//! and does not start while transactional requests are queued. Running
//! analytical scans call [`AdmissionToken::checkpoint`] between chunk
//! groups, which hands their slot back (bounded by `max_yield`) while
//! transactional work is waiting or running on borrowed slots.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use tandem_common::config::GovernorConfig;
use tandem_common::{TandemError, TandemResult};

/// Workload class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadClass {
    /// Point reads and writes.
    Transactional,
    /// Scans and aggregates.
    Analytical,
}

impl fmt::Display for WorkloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadClass::Transactional => write!(f, "transactional"),
            WorkloadClass::Analytical => write!(f, "analytical"),
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    txn_running: usize,
    olap_running: usize,
    txn_waiting: usize,
    olap_waiting: usize,
}

impl Slots {
    fn waiting(&self) -> usize {
        self.txn_waiting + self.olap_waiting
    }

    fn running(&self) -> usize {
        self.txn_running + self.olap_running
    }
}

/// Governor counters.
#[derive(Debug, Default)]
pub struct GovernorStats {
    /// Transactional admissions.
    pub transactional_admitted: AtomicU64,
    /// Analytical admissions.
    pub analytical_admitted: AtomicU64,
    /// Transactional admissions on a borrowed analytical slot.
    pub borrowed: AtomicU64,
    /// Requests refused.
    pub rejected: AtomicU64,
    /// Times an analytical scan paused at a checkpoint.
    pub yields: AtomicU64,
    /// Analytical scans stopped by cancellation.
    pub cancelled: AtomicU64,
    /// Total time spent waiting for admission, in microseconds.
    pub wait_micros: AtomicU64,
}

/// Snapshot of the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GovernorStatsSnapshot {
    /// Transactional slots.
    pub transactional_slots: usize,
    /// Analytical slots.
    pub analytical_slots: usize,
    /// Transactional work running now.
    pub transactional_running: usize,
    /// Analytical work running now.
    pub analytical_running: usize,
    /// Requests queued now.
    pub queued: usize,
    /// Transactional admissions.
    pub transactional_admitted: u64,
    /// Analytical admissions.
    pub analytical_admitted: u64,
    /// Transactional admissions on a borrowed slot.
    pub borrowed: u64,
    /// Requests refused.
    pub rejected: u64,
    /// Checkpoint pauses.
    pub yields: u64,
    /// Scans stopped by cancellation.
    pub cancelled: u64,
    /// Total admission wait, in microseconds.
    pub wait_micros: u64,
}

/// Admission control for the two workload classes.
pub struct ResourceGovernor {
    config: GovernorConfig,
    transactional_slots: usize,
    analytical_slots: usize,
    slots: Mutex<Slots>,
    changed: Condvar,
    cancel_epoch: AtomicU64,
    closed: AtomicBool,
    stats: GovernorStats,
}

impl ResourceGovernor {
    /// Creates a governor.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        let (transactional_slots, analytical_slots) = config.slots();
        debug!(transactional_slots, analytical_slots, "Resource governor configured");
        Self {
            config,
            transactional_slots,
            analytical_slots,
            slots: Mutex::new(Slots::default()),
            changed: Condvar::new(),
            cancel_epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stats: GovernorStats::default(),
        }
    }

    fn total_slots(&self) -> usize {
        self.transactional_slots + self.analytical_slots
    }

    fn can_run(&self, class: WorkloadClass, slots: &Slots) -> bool {
        if slots.running() >= self.total_slots() {
            return false;
        }
        match class {
            WorkloadClass::Transactional => true,
            WorkloadClass::Analytical => {
                slots.olap_running < self.analytical_slots && slots.txn_waiting == 0
            }
        }
    }

    /// Admits a request, waiting up to the admission timeout.
    pub fn admit(&self, class: WorkloadClass) -> TandemResult<AdmissionToken<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TandemError::Closed);
        }
        let started = Instant::now();
        let deadline = started + self.config.admission_timeout();
        let mut slots = self.slots.lock();

        if !self.can_run(class, &slots) {
            if slots.waiting() >= self.config.max_queued {
                drop(slots);
                return Err(self.reject(class, "admission queue is full"));
            }
            match class {
                WorkloadClass::Transactional => slots.txn_waiting += 1,
                WorkloadClass::Analytical => slots.olap_waiting += 1,
            }
            let mut timed_out = false;
            while !self.can_run(class, &slots) && !self.closed.load(Ordering::Acquire) {
                if self.changed.wait_until(&mut slots, deadline).timed_out() {
                    timed_out = !self.can_run(class, &slots);
                    break;
                }
            }
            match class {
                WorkloadClass::Transactional => slots.txn_waiting -= 1,
                WorkloadClass::Analytical => slots.olap_waiting -= 1,
            }
            if timed_out || self.closed.load(Ordering::Acquire) {
                drop(slots);
                // A departing transactional waiter may unblock analytical ones.
                self.changed.notify_all();
                if self.closed.load(Ordering::Acquire) {
                    return Err(TandemError::Closed);
                }
                return Err(self.reject(class, "admission timed out"));
            }
        }

        match class {
            WorkloadClass::Transactional => {
                if slots.txn_running >= self.transactional_slots {
                    self.stats.borrowed.fetch_add(1, Ordering::Relaxed);
                }
                slots.txn_running += 1;
                self.stats
                    .transactional_admitted
                    .fetch_add(1, Ordering::Relaxed);
            }
            WorkloadClass::Analytical => {
                slots.olap_running += 1;
                self.stats
                    .analytical_admitted
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        drop(slots);
        self.stats
            .wait_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);

        Ok(AdmissionToken {
            governor: self,
            class,
            epoch: self.cancel_epoch.load(Ordering::Acquire),
            held: AtomicBool::new(true),
        })
    }

    fn reject(&self, class: WorkloadClass, reason: &str) -> TandemError {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(%class, reason, "Admission rejected");
        TandemError::rejected(format!("{} request: {}", class, reason))
    }

    fn release(&self, class: WorkloadClass) {
        let mut slots = self.slots.lock();
        match class {
            WorkloadClass::Transactional => slots.txn_running = slots.txn_running.saturating_sub(1),
            WorkloadClass::Analytical => slots.olap_running = slots.olap_running.saturating_sub(1),
        }
        drop(slots);
        self.changed.notify_all();
    }

    /// Whether a yielded analytical scan may take a slot back.
    fn can_resume(&self, slots: &Slots, favour_transactional: bool) -> bool {
        if slots.running() >= self.total_slots() || slots.olap_running >= self.analytical_slots {
            return false;
        }
        !favour_transactional
            || (slots.txn_waiting == 0 && slots.txn_running <= self.transactional_slots)
    }

    fn should_yield(&self) -> bool {
        let slots = self.slots.lock();
        slots.txn_waiting > 0 || slots.txn_running > self.transactional_slots
    }

    /// Cancels every analytical request admitted so far at its next checkpoint.
    pub fn cancel_analytical(&self) {
        self.cancel_epoch.fetch_add(1, Ordering::AcqRel);
        self.changed.notify_all();
    }

    /// Refuses new admissions and cancels running analytical work.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel_analytical();
    }

    /// Returns the slot split.
    #[must_use]
    pub fn slot_counts(&self) -> (usize, usize) {
        (self.transactional_slots, self.analytical_slots)
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> GovernorStatsSnapshot {
        let slots = self.slots.lock();
        GovernorStatsSnapshot {
            transactional_slots: self.transactional_slots,
            analytical_slots: self.analytical_slots,
            transactional_running: slots.txn_running,
            analytical_running: slots.olap_running,
            queued: slots.waiting(),
            transactional_admitted: self.stats.transactional_admitted.load(Ordering::Relaxed),
            analytical_admitted: self.stats.analytical_admitted.load(Ordering::Relaxed),
            borrowed: self.stats.borrowed.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            yields: self.stats.yields.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            wait_micros: self.stats.wait_micros.load(Ordering::Relaxed),
        }
    }
}

/// A granted slot, returned when dropped.
pub struct AdmissionToken<'a> {
    governor: &'a ResourceGovernor,
    class: WorkloadClass,
    epoch: u64,
    held: AtomicBool,
}

impl AdmissionToken<'_> {
    /// Returns the workload class.
    #[must_use]
    pub fn class(&self) -> WorkloadClass {
        self.class
    }

    /// Returns true if the request was cancelled after admission.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.governor.cancel_epoch.load(Ordering::Acquire) != self.epoch
    }

    /// Cooperative pause point for analytical work.
    ///
    /// While transactional work is queued or running on borrowed slots the
    /// analytical slot is handed back for at most `max_yield`, then taken
    /// again once one is free. Transactional work keeps priority until the
    /// yield bound passes; after that the scan waits at most the admission
    /// timeout. Fails with `Cancelled` once the request has been cancelled.
    pub fn checkpoint(&self) -> TandemResult<()> {
        if self.class == WorkloadClass::Transactional {
            return Ok(());
        }
        if self.is_cancelled() {
            self.governor.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            return Err(TandemError::Cancelled);
        }
        if !self.held.load(Ordering::Acquire) {
            return Err(TandemError::rejected("analytical request: slot was not regained"));
        }
        if !self.governor.should_yield() {
            return Ok(());
        }

        self.governor.stats.yields.fetch_add(1, Ordering::Relaxed);
        let yield_deadline = Instant::now() + self.governor.config.max_yield();
        let resume_deadline = yield_deadline + self.governor.config.admission_timeout();

        let mut slots = self.governor.slots.lock();
        slots.olap_running = slots.olap_running.saturating_sub(1);
        self.held.store(false, Ordering::Release);
        self.governor.changed.notify_all();

        loop {
            if self.is_cancelled() || self.governor.closed.load(Ordering::Acquire) {
                break;
            }
            let now = Instant::now();
            let favour_transactional = now < yield_deadline;
            if self.governor.can_resume(&slots, favour_transactional) {
                slots.olap_running += 1;
                self.held.store(true, Ordering::Release);
                break;
            }
            if now >= resume_deadline {
                break;
            }
            let until = if favour_transactional { yield_deadline } else { resume_deadline };
            self.governor.changed.wait_until(&mut slots, until);
        }
        drop(slots);

        if self.is_cancelled() {
            self.governor.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            return Err(TandemError::Cancelled);
        }
        if self.held.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.governor.closed.load(Ordering::Acquire) {
            return Err(TandemError::Closed);
        }
        Err(self.governor.reject(self.class, "slot not regained after yield"))
    }
}

impl Drop for AdmissionToken<'_> {
    fn drop(&mut self) {
        if self.held.load(Ordering::Acquire) {
            self.governor.release(self.class);
        }
    }
}

impl fmt::Debug for AdmissionToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionToken")
            .field("class", &self.class)
            .field("epoch", &self.epoch)
            .finish()
    }
}
