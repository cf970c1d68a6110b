//! Core error types.

use relaymq_store::StoreError;
use thiserror::Error;

/// Errors from transactions and broker objects.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("transaction {transaction_id} is aborted and must be rolled back")]
    TransactionAborted { transaction_id: u64 },

    #[error("queue not found: {name}")]
    QueueNotFound { name: String },

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

impl CoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Storage(e) if e.is_retryable())
    }

    /// Returns an error code suitable for protocol responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Storage(_) => "STORAGE_ERROR",
            CoreError::TransactionAborted { .. } => "TRANSACTION_ABORTED",
            CoreError::QueueNotFound { .. } => "QUEUE_NOT_FOUND",
            CoreError::Exchange(e) => e.error_code(),
        }
    }
}

/// Errors from the exchange registry and factory.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(
        "exchange type '{name}' is already registered using '{existing}', cannot register '{rejected}'"
    )]
    DuplicateType {
        name: String,
        existing: String,
        rejected: String,
    },

    #[error("did not find expected exchange type: {0}")]
    MissingBaseType(String),

    #[error("unknown exchange type: {0}")]
    UnknownExchangeType(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: &'static str, reason: String },
}

impl ExchangeError {
    /// Returns true for errors that must stop the broker from starting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExchangeError::DuplicateType { .. } | ExchangeError::MissingBaseType(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ExchangeError::DuplicateType { .. } | ExchangeError::MissingBaseType(_) => {
                "CONFIGURATION_ERROR"
            }
            ExchangeError::UnknownExchangeType(_) => "UNKNOWN_EXCHANGE_TYPE",
            ExchangeError::MissingAttribute(_) | ExchangeError::InvalidAttribute { .. } => {
                "BAD_REQUEST"
            }
        }
    }
}
