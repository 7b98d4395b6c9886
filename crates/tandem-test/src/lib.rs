//! # tandem-test
//!
//! Integration tests for TandemDB.
//!
//! This crate contains:
//! - Helpers that build engines and tables for the tests under `tests/`
//! - End-to-end checks of the row store, change log, synchronizer and
//!   columnar store working together
//! - Governor saturation and crash recovery scenarios

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;
