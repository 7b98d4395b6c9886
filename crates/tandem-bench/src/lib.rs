//! TandemDB Performance Benchmarks
//!
//! This crate contains benchmarks for the TandemDB components:
//! - Row store puts and point reads
//! - Column chunk encoding and chunk group scans
//! - End-to-end ingestion, synchronization and routed queries
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p tandem-bench
//! ```

pub mod utils;
