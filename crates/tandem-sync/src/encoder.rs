//! Turning sealed batches into chunk groups.

use std::sync::Arc;

use tandem_column::{ChunkGroup, ColumnStore};
use tandem_common::TandemResult;

use crate::batch::SealedBatch;

/// Encodes a sealed batch into a chunk group.
///
/// Encoding must be a pure function of the batch: the synchronizer retries a
/// failed batch with the same input and relies on getting the same group.
pub trait BatchEncoder: Send + Sync {
    /// Encodes `batch`.
    fn encode(&self, batch: &SealedBatch) -> TandemResult<ChunkGroup>;
}

/// Encoder using the columnar store's schemas and encoding settings.
pub struct ColumnEncoder {
    store: Arc<ColumnStore>,
}

impl ColumnEncoder {
    /// Creates an encoder for `store`.
    #[must_use]
    pub fn new(store: Arc<ColumnStore>) -> Self {
        Self { store }
    }
}

impl BatchEncoder for ColumnEncoder {
    fn encode(&self, batch: &SealedBatch) -> TandemResult<ChunkGroup> {
        self.store.build_group(
            batch.table_id,
            batch.first_seq,
            batch.last_seq,
            &batch.rows,
            batch.deleted.clone(),
        )
    }
}
