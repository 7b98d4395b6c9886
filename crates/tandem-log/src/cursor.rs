//! Named change log cursors.
//!
//! A cursor remembers how far its consumer has read and what it has
//! acknowledged. Reads go through [`ChangeLog::read_cursor`]; cursors hold no
//! locks of their own and never block the commit path.
//!
//! [`ChangeLog::read_cursor`]: crate::ChangeLog::read_cursor

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tandem_common::types::SeqNo;

#[derive(Debug)]
pub(crate) struct CursorState {
    /// Last sequence number handed to the consumer.
    pub(crate) position: AtomicU64,
    /// Last sequence number the consumer has acknowledged.
    pub(crate) acked: AtomicU64,
    /// Cleared when the cursor is dropped from the log.
    pub(crate) active: AtomicBool,
}

impl CursorState {
    pub(crate) fn new(start_after: SeqNo) -> Self {
        Self {
            position: AtomicU64::new(start_after.as_u64()),
            acked: AtomicU64::new(start_after.as_u64()),
            active: AtomicBool::new(true),
        }
    }
}

/// Handle to a named cursor.
#[derive(Debug, Clone)]
pub struct Cursor {
    name: Arc<str>,
    pub(crate) state: Arc<CursorState>,
}

impl Cursor {
    pub(crate) fn new(name: &str, state: Arc<CursorState>) -> Self {
        Self {
            name: Arc::from(name),
            state,
        }
    }

    /// Returns the cursor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the last sequence number read through this cursor.
    #[must_use]
    pub fn position(&self) -> SeqNo {
        SeqNo::new(self.state.position.load(Ordering::Acquire))
    }

    /// Returns the last acknowledged sequence number.
    #[must_use]
    pub fn acknowledged(&self) -> SeqNo {
        SeqNo::new(self.state.acked.load(Ordering::Acquire))
    }

    /// Moves the read position back to just after `seq`.
    ///
    /// Used to re-read entries that were handed out but not acknowledged.
    pub fn rewind_to(&self, seq: SeqNo) {
        let target = seq.max(self.acknowledged());
        self.state.position.store(target.as_u64(), Ordering::Release);
    }

    /// Returns false once the cursor has been dropped from its log.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }
}
