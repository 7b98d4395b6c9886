//! Row pages.
//!
//! A page is a fixed number of record slots. A row is placed in a slot on
//! its first insert and keeps that slot for the lifetime of the table, so
//! the directory entry never changes once written.

use tandem_common::types::RowId;

use crate::version::{RowVersion, VersionChain};

/// Position of a row inside the row store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    /// Page index within the table.
    pub page: u32,
    /// Slot index within the page.
    pub slot: u32,
}

/// An occupied slot.
#[derive(Debug, Clone)]
pub struct Slot {
    /// Row key.
    pub row_id: RowId,
    /// Committed versions.
    pub chain: VersionChain,
}

/// A fixed-capacity set of record slots.
#[derive(Debug)]
pub struct RowPage {
    slots: Vec<Option<Slot>>,
    used: usize,
}

impl RowPage {
    /// Creates an empty page.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            used: 0,
        }
    }

    /// Returns the slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns true if every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.used >= self.slots.len()
    }

    /// Places a row in `slot`. The slot must be free.
    pub fn place(&mut self, slot: usize, row_id: RowId) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry @ None) => {
                *entry = Some(Slot {
                    row_id,
                    chain: VersionChain::new(),
                });
                self.used += 1;
                true
            }
            _ => false,
        }
    }

    /// Returns the slot contents.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Slot> {
        self.slots.get(slot)?.as_ref()
    }

    /// Installs a version in an occupied slot.
    pub fn install(&mut self, slot: usize, version: RowVersion, max_versions: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(Some(entry)) => entry.chain.push(version, max_versions),
            _ => false,
        }
    }

    /// Iterates over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tandem_common::types::{SeqNo, Timestamp, TxnId, Value};

    #[test]
    fn test_place_and_install() {
        let mut page = RowPage::new(2);
        assert!(page.place(0, RowId::new(7)));
        assert!(!page.place(0, RowId::new(8)));
        assert!(!page.place(5, RowId::new(8)));
        assert!(page.place(1, RowId::new(8)));
        assert!(page.is_full());

        let version = RowVersion {
            seq: SeqNo::new(1),
            txn_id: TxnId::new(1),
            commit_ts: Timestamp::ZERO,
            values: Some(Arc::new(vec![Value::Int64(1)])),
        };
        assert!(page.install(0, version, 4));
        assert_eq!(page.get(0).unwrap().chain.len(), 1);
        assert_eq!(page.iter().count(), 2);
    }
}
