//! # tandem-column
//!
//! Columnar store for TandemDB's analytical path.
//!
//! Data arrives as sealed [`ChunkGroup`]s built by the synchronizer. Each
//! column of a group is one [`ColumnChunk`] in the encoding that fits its
//! values best (plain, dictionary, run-length or delta), with a zone map
//! used to skip groups a predicate cannot match. Rows replaced by a later
//! group are masked through per-group [`DeleteVector`]s.
//!
//! Scans run over an immutable [`TableVersion`] and only at or below the
//! store's watermark. Aggregates are computed per group and folded in
//! chunk-id order, so a result never depends on scheduling.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tandem_column::{Aggregate, ColumnStore, GroupRow, ScanRequest};
//! use tandem_common::config::ColumnStoreConfig;
//! use tandem_common::types::{ColumnDef, ColumnType, RowId, SeqNo, TableId, TableSchema, Value};
//!
//! let store = ColumnStore::new(ColumnStoreConfig::default(), SeqNo::ZERO);
//! let table = TableId::new(1);
//! let schema = TableSchema::new(table, "accounts", vec![ColumnDef::new("amount", ColumnType::Int64)]).unwrap();
//! store.create_table(Arc::new(schema)).unwrap();
//!
//! let rows: Vec<GroupRow> = (1..=3)
//!     .map(|i| GroupRow { row_id: RowId::new(i), seq: SeqNo::new(i), values: Arc::new(vec![Value::Int64(10)]) })
//!     .collect();
//! let group = store.build_group(table, SeqNo::new(1), SeqNo::new(3), &rows, Vec::new()).unwrap();
//! store.publish(group).unwrap();
//! store.advance_watermark(SeqNo::new(3));
//!
//! let result = store
//!     .scan(table, &ScanRequest::new(SeqNo::new(3)).with_aggregate(Aggregate::new().sum("amount")))
//!     .unwrap();
//! assert_eq!(result.aggregate().unwrap().scalar("sum(amount)"), Some(&Value::Int64(30)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod chunk;
pub mod delete;
pub mod encoding;
pub mod group;
pub mod scan;
pub mod sketch;
pub mod store;

pub use aggregate::{
    fold_partials, Aggregate, AggregateFunction, AggregatePartial, AggregateResult, BoundAggregate,
};
pub use chunk::{ColumnChunk, ZoneMap};
pub use delete::DeleteVector;
pub use encoding::{choose_encoding, ColumnProfile, Encoding};
pub use group::{ChunkGroup, GroupRow};
pub use scan::{ScanOutput, ScanRequest, ScanResult, ScanRow, ScanYield};
pub use sketch::QuantileSketch;
pub use store::{
    ColumnCompression, ColumnStore, ColumnStoreStats, ColumnStoreStatsSnapshot, GroupHandle,
    TableVersion,
};
