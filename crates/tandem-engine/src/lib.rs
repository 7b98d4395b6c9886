//! # tandem-engine
//!
//! The TandemDB engine: one change log feeding a row store for current
//! reads and a columnar store for analytical scans, kept in step by the
//! synchronizer.
//!
//! - [`Engine`] is the facade: table creation, ingestion, reads, routed
//!   queries, stats and shutdown. Opening an engine on a data directory
//!   replays the retained change log into both stores.
//! - [`QueryRouter`] sends each [`Query`] to a store by shape and staleness.
//! - [`ResourceGovernor`] splits execution slots between transactional and
//!   analytical work and lets transactional work preempt scans.
//! - [`Catalog`] keeps table schemas.
//! - [`Snapshot`] persists the live rows so change log segments can be
//!   purged without losing them.
//!
//! ## Example
//!
//! ```
//! use tandem_common::config::EngineConfig;
//! use tandem_common::types::{ColumnDef, ColumnType, RowId, Value};
//! use tandem_column::Aggregate;
//! use tandem_engine::{Engine, Query, Staleness};
//!
//! let engine = Engine::open_manual(EngineConfig::for_testing()).unwrap();
//! let table = engine
//!     .create_table("accounts", vec![ColumnDef::new("amount", ColumnType::Int64)])
//!     .unwrap();
//! let seq = engine
//!     .put(table, RowId::new(1), vec![Value::Int64(40)], engine.begin_txn())
//!     .unwrap();
//!
//! engine.sync_now().unwrap();
//! let query = Query::aggregate(table, Aggregate::new().sum("amount"))
//!     .with_staleness(Staleness::AtLeast(seq));
//! let result = engine.query(&query).unwrap();
//! assert_eq!(result.aggregate().unwrap().scalar("sum(amount)"), Some(&Value::Int64(40)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod checkpoint;
pub mod engine;
pub mod governor;
pub mod router;

pub use catalog::{Catalog, CATALOG_FILE};
pub use checkpoint::{Snapshot, SNAPSHOT_FILE};
pub use engine::{Engine, EngineStats, QueryOutput, QueryResult, LOG_DIR};
pub use governor::{AdmissionToken, GovernorStats, GovernorStatsSnapshot, ResourceGovernor, WorkloadClass};
pub use router::{Query, QueryRouter, QueryTarget, Route, RouterStats, RouterStatsSnapshot, Staleness};
