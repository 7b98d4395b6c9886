//! # tandem-row
//!
//! Row-oriented store for TandemDB's transactional path.
//!
//! Rows live in fixed-capacity pages; a row is placed in a slot on first
//! insert and stays there. Each slot keeps a bounded chain of committed
//! versions, newest first, so point-in-time reads work without a separate
//! undo structure.
//!
//! Writers serialize per row through FIFO latches ([`RowLatchTable`]) and
//! commit through the change log: the version is installed inside the log's
//! commit section, which makes visibility order equal to sequence order.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tandem_common::config::{ChangeLogConfig, RowStoreConfig};
//! use tandem_common::types::{ColumnDef, ColumnType, RowId, TableId, TableSchema, TxnId, Value};
//! use tandem_log::ChangeLog;
//! use tandem_row::RowStore;
//!
//! let log = Arc::new(ChangeLog::in_memory(ChangeLogConfig::default()));
//! let store = RowStore::new(RowStoreConfig::default(), log);
//! let schema = TableSchema::new(
//!     TableId::new(1),
//!     "accounts",
//!     vec![ColumnDef::new("amount", ColumnType::Decimal { scale: 2 })],
//! )
//! .unwrap();
//! store.create_table(schema).unwrap();
//!
//! let seq = store
//!     .put(TableId::new(1), RowId::new(12345), vec![Value::decimal(500000, 2)], TxnId::new(1))
//!     .unwrap();
//! let record = store.get(TableId::new(1), RowId::new(12345)).unwrap();
//! assert_eq!(record.seq, seq);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod latch;
pub mod page;
pub mod store;
pub mod table;
pub mod version;

pub use latch::{LatchStats, RowLatchGuard, RowLatchTable};
pub use store::{RowStore, RowStoreStats, RowStoreStatsSnapshot};
pub use table::{Record, RowTable};
pub use version::{RowVersion, VersionChain};
