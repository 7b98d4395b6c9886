//! Engine error types.
//!
//! Row-level errors surface to callers unchanged. Synchronizer errors are
//! contained inside the synchronizer and only escalate through its alarm.

use std::fmt;
use thiserror::Error;

use crate::types::{RowId, SeqNo, TableId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid configuration.
    Config = 0x0002,
    /// Operation was cancelled.
    Cancelled = 0x0003,
    /// The engine has been shut down.
    Closed = 0x0004,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0101,

    // Row store errors (0x0200 - 0x02FF)
    /// Row not found.
    NotFound = 0x0200,
    /// Row latch could not be acquired in time.
    LockTimeout = 0x0201,
    /// Values do not conform to the table schema.
    SchemaMismatch = 0x0202,
    /// Table not found.
    TableNotFound = 0x0203,
    /// Table already exists.
    TableExists = 0x0204,

    // Change log errors (0x0300 - 0x03FF)
    /// A cursor observed a missing sequence number.
    SequenceGap = 0x0300,

    // Columnar errors (0x0400 - 0x04FF)
    /// The watermark has not reached the requested sequence number.
    StaleData = 0x0400,
    /// A batch could not be encoded into column chunks.
    EncodingFailure = 0x0401,

    // Query errors (0x0500 - 0x05FF)
    /// The query shape cannot be served by either store.
    UnsupportedQueryShape = 0x0500,

    // Governor errors (0x0600 - 0x06FF)
    /// Admission was refused.
    Rejected = 0x0600,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "RowStore",
            0x03 => "ChangeLog",
            0x04 => "ColumnStore",
            0x05 => "Query",
            0x06 => "Governor",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for TandemDB.
///
/// # Example
///
/// ```rust
/// use tandem_common::error::{ErrorCode, TandemError};
/// use tandem_common::types::SeqNo;
///
/// let err = TandemError::StaleData {
///     required: SeqNo::new(501_001),
///     watermark: SeqNo::new(501_000),
/// };
/// assert_eq!(err.code(), ErrorCode::StaleData);
/// assert!(err.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum TandemError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Operation was cancelled at a cooperative checkpoint.
    #[error("operation was cancelled")]
    Cancelled,

    /// The engine is shut down or the component was closed.
    #[error("engine is closed")]
    Closed,

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    // ==========================================================================
    // Row Store Errors
    // ==========================================================================
    /// Row not found.
    #[error("row {row_id} not found in table {table_id}")]
    NotFound {
        /// Table searched.
        table_id: TableId,
        /// Missing row.
        row_id: RowId,
    },

    /// The per-row latch was not granted within the latch timeout.
    #[error("timed out after {waited_ms}ms waiting for row {row_id} in table {table_id}")]
    LockTimeout {
        /// Table of the contended row.
        table_id: TableId,
        /// Contended row.
        row_id: RowId,
        /// How long the writer waited.
        waited_ms: u64,
    },

    /// Values do not conform to the table schema.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Error message.
        message: String,
    },

    /// Table not found.
    #[error("table '{table}' not found")]
    TableNotFound {
        /// The missing table, by name or id.
        table: String,
    },

    /// A table with the same id or name already exists.
    #[error("table '{table}' already exists")]
    TableExists {
        /// The conflicting table.
        table: String,
    },

    // ==========================================================================
    // Change Log Errors
    // ==========================================================================
    /// A cursor found a hole in the sequence.
    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap {
        /// Next sequence number the cursor expected.
        expected: SeqNo,
        /// Sequence number actually available.
        found: SeqNo,
    },

    // ==========================================================================
    // Columnar Errors
    // ==========================================================================
    /// The columnar watermark is behind the requested time bound.
    #[error("stale data: required sequence {required}, watermark is {watermark}")]
    StaleData {
        /// Requested time bound.
        required: SeqNo,
        /// Watermark at the time of the request.
        watermark: SeqNo,
    },

    /// A batch could not be encoded.
    #[error("encoding failure: {message}")]
    EncodingFailure {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Query and Governor Errors
    // ==========================================================================
    /// Neither store can serve the query.
    #[error("unsupported query shape: {reason}")]
    UnsupportedQueryShape {
        /// Why the query was refused.
        reason: String,
    },

    /// Admission was refused by the resource governor.
    #[error("admission rejected: {reason}")]
    Rejected {
        /// Why the request was refused.
        reason: String,
    },
}

impl TandemError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::Config { .. } => ErrorCode::Config,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Closed => ErrorCode::Closed,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::TableExists { .. } => ErrorCode::TableExists,
            Self::SequenceGap { .. } => ErrorCode::SequenceGap,
            Self::StaleData { .. } => ErrorCode::StaleData,
            Self::EncodingFailure { .. } => ErrorCode::EncodingFailure,
            Self::UnsupportedQueryShape { .. } => ErrorCode::UnsupportedQueryShape,
            Self::Rejected { .. } => ErrorCode::Rejected,
        }
    }

    /// Returns true if the caller may retry the same operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::StaleData { .. }
                | Self::Rejected { .. }
                | Self::EncodingFailure { .. }
        )
    }

    /// Returns true if the error halts the component that raised it.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SequenceGap { .. } | Self::Corruption { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a schema mismatch error.
    #[must_use]
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates an encoding failure.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailure {
            message: message.into(),
        }
    }

    /// Creates an unsupported query shape error.
    #[must_use]
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedQueryShape {
            reason: reason.into(),
        }
    }

    /// Creates an admission rejection.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Creates a table-not-found error.
    #[must_use]
    pub fn table_not_found(table: impl fmt::Display) -> Self {
        Self::TableNotFound {
            table: table.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = TandemError::LockTimeout {
            table_id: TableId::new(1),
            row_id: RowId::new(2),
            waited_ms: 10,
        };
        assert_eq!(err.code(), ErrorCode::LockTimeout);
        assert_eq!(err.code().category(), "RowStore");
        assert_eq!(ErrorCode::SequenceGap.category(), "ChangeLog");
        assert_eq!(ErrorCode::Rejected.as_u16(), 0x0600);
    }

    #[test]
    fn test_retry_classification() {
        assert!(TandemError::rejected("queue full").is_retryable());
        assert!(TandemError::encoding("bad batch").is_retryable());
        assert!(!TandemError::unsupported("fresh aggregate").is_retryable());
        assert!(!TandemError::Cancelled.is_retryable());

        let gap = TandemError::SequenceGap {
            expected: SeqNo::new(5),
            found: SeqNo::new(9),
        };
        assert!(gap.is_fatal());
        assert!(!gap.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = TandemError::StaleData {
            required: SeqNo::new(501_001),
            watermark: SeqNo::new(0),
        };
        assert_eq!(
            err.to_string(),
            "stale data: required sequence 501001, watermark is 0"
        );

        let io: TandemError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(io.code(), ErrorCode::Io);
    }
}
