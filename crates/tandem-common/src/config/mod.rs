//! Configuration for TandemDB.
//!
//! This module provides configuration structures for all engine components.

mod engine;

pub use engine::{
    ChangeLogConfig, ColumnStoreConfig, EngineConfig, GovernorConfig, LogSyncMode, RouterConfig,
    RowStoreConfig, SyncConfig,
};
