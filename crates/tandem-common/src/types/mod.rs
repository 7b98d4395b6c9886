//! Type definitions for TandemDB.
//!
//! This module contains all core type definitions shared by the row store,
//! the change log and the columnar store.

mod ids;
mod predicate;
mod schema;
mod timestamps;
mod value;

pub use ids::{ChunkId, RowId, SeqNo, TableId, TxnId};
pub use predicate::{BoundPredicate, CompareOp, Predicate};
pub use schema::{ColumnDef, TableSchema};
pub use timestamps::Timestamp;
pub use value::{decode_row, encode_row, encoded_row_len, ColumnType, Row, Value};
