//! # tandem-server
//!
//! Pieces of the `tandemd` daemon that are worth testing on their own:
//! the server configuration file and the synthetic mixed workload used to
//! exercise a running engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod workload;

pub use config::{ServerConfig, ServerConfigBuilder, WorkloadConfig};
pub use workload::{Workload, WorkloadStats, WorkloadStatsSnapshot};
