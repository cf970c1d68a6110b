//! Store error types.

use thiserror::Error;

/// Errors that can occur during message store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record corrupted at offset {offset}: CRC mismatch (expected {expected:#x}, got {actual:#x})")]
    CorruptedRecord {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("invalid record header at offset {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("no content record for message {message_id} at offset {offset}")]
    ContentMissing { message_id: u64, offset: u64 },

    #[error("message store is closed")]
    Closed,

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }

    /// Returns true for errors that mean the log bytes themselves are bad.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptedRecord { .. } | StoreError::InvalidHeader { .. }
        )
    }
}
