//! Storage engine error types
//!
//! Every fallible operation in the engine returns [`StoreResult`]. The
//! variants map one-to-one onto the conditions callers are expected to
//! distinguish: missing data, retryable write conflicts, quota breaches,
//! unencodable data, an unreachable backing store and internal
//! consistency failures.

use thiserror::Error;

/// Errors that can occur in the version store and its collaborators
#[derive(Error, Debug)]
pub enum StoreError {
    /// No version, chunk or snapshot matches the selector
    #[error("No data found: {0}")]
    NotFound(String),

    /// Uniqueness violation on version insert; the whole write must be retried
    #[error("Write conflict on {symbol}: {reason}")]
    WriteConflict { symbol: String, reason: String },

    /// The library is over its configured byte budget
    #[error("Quota exceeded for library {library}: {used} bytes used of {quota}")]
    QuotaExceeded { library: String, used: u64, quota: u64 },

    /// The codec cannot infer or encode a column's type
    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),

    /// The backing store could not be reached within the configured timeout
    #[error("Backing store unavailable: {0}")]
    StoreUnavailable(String),

    /// Internal consistency check failed
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A snapshot with this name already exists
    #[error("Snapshot already exists: {0}")]
    DuplicateSnapshot(String),

    /// Appended or updated data does not match the stored shape
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The selected handler does not support this operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Stored bytes failed an integrity check
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Backing store reported an error that is none of the above
    #[error("Backend error: {0}")]
    Backend(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }

    /// Whether the caller may simply re-invoke the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Busy, locked and unopenable databases are unavailability; the rest
/// is a backend failure
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::DatabaseBusy)
            | Some(ErrorCode::DatabaseLocked) => StoreError::StoreUnavailable(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<regex::Error> for StoreError {
    fn from(err: regex::Error) -> Self {
        StoreError::InvalidInput(err.to_string())
    }
}

impl From<csv::Error> for StoreError {
    fn from(err: csv::Error) -> Self {
        if !err.is_io_error() {
            return StoreError::InvalidInput(format!("CSV: {}", err));
        }
        match err.into_kind() {
            csv::ErrorKind::Io(e) => StoreError::Io(e),
            other => StoreError::InvalidInput(format!("CSV: {:?}", other)),
        }
    }
}

/// Result type alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::not_found("symbol 'mood' in library 'test'");
        assert_eq!(err.to_string(), "No data found: symbol 'mood' in library 'test'");

        let err = StoreError::QuotaExceeded {
            library: "lib".into(),
            used: 120,
            quota: 10,
        };
        assert_eq!(
            err.to_string(),
            "Quota exceeded for library lib: 120 bytes used of 10"
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = StoreError::WriteConflict {
            symbol: "s".into(),
            reason: "duplicate version".into(),
        };
        assert!(conflict.is_retryable());
        assert!(!StoreError::StoreUnavailable("down".into()).is_retryable());
        assert!(!StoreError::not_found("s").is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }
}
