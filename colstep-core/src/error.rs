//! Error types for ColStep

use thiserror::Error;

/// Result type alias for ColStep operations
pub type Result<T> = std::result::Result<T, ColStepError>;

/// ColStep error types
#[derive(Error, Debug)]
pub enum ColStepError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Host data type tag outside the supported element kinds
    #[error("Unsupported data type tag {tag} for column {column}")]
    UnsupportedDataType { column: String, tag: i32 },

    /// Column name is empty or otherwise unusable
    #[error("Invalid column name: {0:?}")]
    InvalidColumnName(String),

    /// Column name declared twice
    #[error("Column {0} already declared")]
    DuplicateColumn(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Call issued in the wrong lifecycle state
    #[error("Usage error: {0}")]
    UsageOrder(String),

    /// Attempt to bind a second, different shape to a column
    #[error("Column {column} already has shape {bound:?}, cannot rebind to {requested:?}")]
    ShapeReassigned {
        column: String,
        bound: Vec<u64>,
        requested: Vec<u64>,
    },

    /// Payload shape differs from the declared row shape
    #[error("Shape mismatch on column {column}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        column: String,
        expected: Vec<u64>,
        actual: Vec<u64>,
    },

    /// Slice region outside the row shape
    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    /// Row count cannot change once variables are registered
    #[error("Row count is fixed at {fixed}, requested {requested}")]
    RowCountFixed { fixed: u64, requested: u64 },

    /// Row index past the end of the table
    #[error("Row {row} out of range for {rows} rows")]
    RowOutOfRange { row: u64, rows: u64 },

    /// Accessor element kind differs from the column's kind
    #[error("Type mismatch on column {column}: column holds {expected}, accessed as {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Engine reported a failure
    #[error("Engine error: {0}")]
    Engine(String),

    /// Collective step boundary failed on a peer
    #[error("Collective step boundary aborted: {0}")]
    CollectiveAborted(String),

    /// Requested selection contains elements no step has written
    #[error("Variable {variable}: selection not written")]
    SelectionNotWritten { variable: String },

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Malformed persisted manager descriptor
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ColStepError {
    /// Check if the error leaves the engine session unusable
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            ColStepError::Engine(_)
                | ColStepError::CollectiveAborted(_)
                | ColStepError::Io(_)
                | ColStepError::Corruption(_)
                | ColStepError::ChecksumMismatch { .. }
        )
    }

    /// Check if error was raised while declaring or configuring
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ColStepError::UnsupportedDataType { .. }
                | ColStepError::InvalidColumnName(_)
                | ColStepError::DuplicateColumn(_)
                | ColStepError::Config(_)
        )
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ColStepError::Corruption(_) | ColStepError::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = ColStepError::UnsupportedDataType {
            column: "c".into(),
            tag: 1,
        };
        assert!(err.is_configuration());
        assert!(!err.is_fatal_to_session());

        let err = ColStepError::CollectiveAborted("rank 1 left".into());
        assert!(err.is_fatal_to_session());

        let err = ColStepError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        };
        assert!(err.is_corruption());
        assert!(err.is_fatal_to_session());
    }
}
