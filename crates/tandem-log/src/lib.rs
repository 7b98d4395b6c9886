//! # tandem-log
//!
//! The change log: an append-only, totally ordered sequence of committed row
//! mutations that the columnar synchronizer consumes.
//!
//! - Sequence numbers are assigned under the commit section, so they are
//!   strictly increasing and gap-free.
//! - Readers use named cursors and never block the commit path.
//! - Retention discards entries that every cursor has acknowledged and the
//!   columnar watermark has passed.
//! - Optionally every entry is framed and written to a segment file before
//!   it becomes observable.
//!
//! ## Frame Format
//!
//! ```text
//! +----------+------------+-----------+----------------------+
//! | Seq (8)  | Length (4) | CRC32 (4) | Payload (Length)     |
//! +----------+------------+-----------+----------------------+
//! ```
//!
//! The checksum covers the sequence number, the length and the payload.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod durable;
pub mod entry;
pub mod frame;
pub mod log;
pub mod segment;

pub use cursor::Cursor;
pub use durable::DurableLog;
pub use entry::{ChangeDraft, ChangeEntry, ChangeKind};
pub use log::{ChangeLog, LogIter, LogStats, LogStatsSnapshot};
