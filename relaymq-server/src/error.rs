//! Server error types.

use crate::config::ConfigError;
use crate::lifecycle::BrokerState;
use relaymq_codec::{ErrorCondition, ProtocolError, RegistryError};
use relaymq_core::{CoreError, ExchangeError};
use relaymq_store::StoreError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("type registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid broker state transition from {from} to {to}")]
    InvalidStateTransition { from: BrokerState, to: BrokerState },

    #[error("no async runtime available to schedule {0}")]
    NoRuntime(String),

    #[error("storage task failed: {0}")]
    StorageTask(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns the error condition reported to a peer.
    pub fn error_condition(&self) -> ErrorCondition {
        match self {
            ServerError::Protocol(e) => e.error_condition(),
            ServerError::Core(CoreError::TransactionAborted { .. }) => {
                ErrorCondition::TransactionRollback
            }
            ServerError::Core(CoreError::QueueNotFound { .. }) => ErrorCondition::NotFound,
            ServerError::Core(CoreError::Exchange(_)) | ServerError::Exchange(_) => {
                ErrorCondition::InvalidField
            }
            ServerError::InvalidStateTransition { .. } => ErrorCondition::IllegalState,
            ServerError::Io(_)
            | ServerError::Core(CoreError::Storage(_))
            | ServerError::Storage(_)
            | ServerError::Registry(_)
            | ServerError::Config(_)
            | ServerError::NoRuntime(_)
            | ServerError::StorageTask(_)
            | ServerError::ShuttingDown => ErrorCondition::InternalError,
        }
    }

    /// Returns true for errors that must stop the broker from starting.
    pub fn is_fatal_at_startup(&self) -> bool {
        match self {
            ServerError::Config(_) | ServerError::Registry(_) | ServerError::NoRuntime(_) => true,
            ServerError::Exchange(e) => e.is_fatal(),
            ServerError::Core(CoreError::Exchange(e)) => e.is_fatal(),
            _ => false,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Core(e) => e.is_retryable(),
            ServerError::Storage(e) => e.is_retryable(),
            ServerError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymq_codec::DecodeError;

    #[test]
    fn test_error_conditions() {
        let decode = ServerError::from(ProtocolError::Decode(DecodeError::UnknownFormatCode(0x99)));
        assert_eq!(decode.error_condition(), ErrorCondition::DecodeError);

        let storage = ServerError::from(CoreError::Storage(StoreError::Closed));
        assert_eq!(storage.error_condition(), ErrorCondition::InternalError);

        let aborted = ServerError::from(CoreError::TransactionAborted { transaction_id: 1 });
        assert_eq!(aborted.error_condition(), ErrorCondition::TransactionRollback);
    }

    #[test]
    fn test_startup_fatal() {
        let duplicate = ServerError::from(ExchangeError::DuplicateType {
            name: "direct".into(),
            existing: "a".into(),
            rejected: "b".into(),
        });
        assert!(duplicate.is_fatal_at_startup());

        let config = ServerError::from(ConfigError::ValidationError("bad".into()));
        assert!(config.is_fatal_at_startup());

        assert!(!ServerError::ShuttingDown.is_fatal_at_startup());
    }
}
