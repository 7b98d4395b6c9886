//! Delete vectors.
//!
//! A delete vector marks the offsets of a chunk group whose rows were
//! superseded by a later version or deleted. Sealed chunk data is never
//! patched; publishing a batch that supersedes rows installs a new copy of
//! the affected vectors in the next table version.

use bitvec::prelude::*;

/// Superseded-row bitmap of one chunk group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteVector {
    bits: BitVec,
    deleted: usize,
}

impl DeleteVector {
    /// Creates a vector with no deleted rows.
    #[must_use]
    pub fn new(rows: usize) -> Self {
        Self {
            bits: bitvec![0; rows],
            deleted: 0,
        }
    }

    /// Marks `offset` deleted. Returns false if it already was or is out of range.
    pub fn mark(&mut self, offset: usize) -> bool {
        match self.bits.get(offset).map(|b| *b) {
            Some(false) => {
                self.bits.set(offset, true);
                self.deleted += 1;
                true
            }
            _ => false,
        }
    }

    /// Returns true if `offset` is deleted.
    #[must_use]
    pub fn is_deleted(&self, offset: usize) -> bool {
        self.bits.get(offset).map_or(false, |b| *b)
    }

    /// Returns the number of rows covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if the vector covers no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns the number of deleted rows.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    /// Returns the number of rows still live.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.bits.len() - self.deleted
    }

    /// Deleted share of the covered rows.
    #[must_use]
    pub fn deleted_ratio(&self) -> f64 {
        if self.bits.is_empty() {
            0.0
        } else {
            self.deleted as f64 / self.bits.len() as f64
        }
    }

    /// Iterates over deleted offsets in ascending order.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// Clears deleted offsets from a selection bitmap.
    pub fn apply_to(&self, selection: &mut BitVec) {
        if self.deleted == 0 {
            return;
        }
        for offset in self.bits.iter_ones() {
            if offset < selection.len() {
                selection.set(offset, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_apply() {
        let mut dv = DeleteVector::new(8);
        assert!(dv.mark(1));
        assert!(dv.mark(6));
        assert!(!dv.mark(6));
        assert!(!dv.mark(8));
        assert_eq!(dv.deleted_count(), 2);
        assert_eq!(dv.live_count(), 6);
        assert_eq!(dv.offsets().collect::<Vec<_>>(), vec![1, 6]);

        let mut selection = bitvec![1; 8];
        dv.apply_to(&mut selection);
        assert_eq!(selection.count_ones(), 6);
        assert!(!selection[1]);
        assert!((dv.deleted_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_copy_on_write() {
        let original = DeleteVector::new(4);
        let mut next = original.clone();
        next.mark(0);
        assert!(!original.is_deleted(0));
        assert!(next.is_deleted(0));
    }
}
