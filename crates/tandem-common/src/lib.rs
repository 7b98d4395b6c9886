//! # tandem-common
//!
//! Common types, errors, and configuration for TandemDB.
//!
//! This crate provides the foundational types shared by the row store, the
//! change log, the columnar store and the engine facade:
//!
//! - **Types**: identifiers (`TableId`, `RowId`, `SeqNo`, `TxnId`), typed
//!   values and rows, table schemas and predicates
//! - **Errors**: unified error handling with `TandemError`
//! - **Config**: engine configuration structures with TOML support
//! - **Constants**: system-wide defaults and limits
//!
//! ## Example
//!
//! ```rust
//! use tandem_common::types::{ColumnDef, ColumnType, TableId, TableSchema, Value};
//! use tandem_common::TandemResult;
//!
//! fn example() -> TandemResult<()> {
//!     let schema = TableSchema::new(
//!         TableId::new(1),
//!         "accounts",
//!         vec![
//!             ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
//!             ColumnDef::new("type", ColumnType::Text),
//!         ],
//!     )?;
//!     schema.validate_row(&[Value::decimal(500000, 2), Value::text("DEPOSIT")])?;
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use error::{ErrorCode, TandemError, TandemResult};
pub use types::{
    ChunkId, ColumnType, Predicate, Row, RowId, SeqNo, TableId, TableSchema, Timestamp, TxnId,
    Value,
};
