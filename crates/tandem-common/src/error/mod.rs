//! Error handling for TandemDB.
//!
//! This module provides a unified error type and result alias used
//! across all TandemDB components.

mod tandem;

pub use tandem::{ErrorCode, TandemError};

/// Result type alias for TandemDB operations.
pub type TandemResult<T> = std::result::Result<T, TandemError>;
