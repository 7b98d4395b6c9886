//! # tandem-sync
//!
//! Moves committed changes from the change log into the columnar store.
//!
//! The [`Synchronizer`] reads the log through its own cursor, keeps one open
//! batch per table (last change per row wins, deletes become tombstones),
//! seals batches by size or age and publishes them as chunk groups. After
//! every round the columnar watermark is raised to the highest sequence
//! number below which nothing is buffered, and the log is told it may
//! release what the watermark has passed.
//!
//! [`SyncWorker`] runs rounds on a background thread.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod encoder;
pub mod synchronizer;
pub mod worker;

pub use batch::{OpenBatch, SealedBatch};
pub use encoder::{BatchEncoder, ColumnEncoder};
pub use synchronizer::{SyncRound, SyncStats, SyncStatsSnapshot, Synchronizer, SYNC_CURSOR};
pub use worker::SyncWorker;
