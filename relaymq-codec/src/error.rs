//! Codec error types and wire error conditions.

use std::fmt;
use thiserror::Error;

/// Malformed input: bytes are present but violate the wire grammar.
///
/// Running out of input is never an error; constructors report it as
/// `Ok(None)` so the caller can retry once more bytes have arrived.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown format code: {0:#04x}")]
    UnknownFormatCode(u8),

    #[error("invalid {type_name} length: {reason}")]
    InvalidLength {
        type_name: &'static str,
        reason: String,
    },

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("non-ASCII byte in symbol")]
    InvalidSymbol,

    #[error("invalid char code point: {0:#x}")]
    InvalidChar(u32),

    #[error("invalid boolean byte: {0:#04x}")]
    InvalidBoolean(u8),

    #[error("map has odd element count: {0}")]
    OddMapCount(u32),

    #[error("nesting depth exceeds limit of {0}")]
    NestingTooDeep(usize),

    #[error("unexpected value: expected {expected}, got {actual}")]
    UnexpectedValue {
        expected: &'static str,
        actual: String,
    },
}

impl DecodeError {
    pub(crate) fn invalid_length(type_name: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::InvalidLength {
            type_name,
            reason: reason.into(),
        }
    }

    /// Returns the error condition reported to the peer.
    pub fn error_condition(&self) -> ErrorCondition {
        ErrorCondition::DecodeError
    }
}

/// Errors raised while encoding values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("array elements must share one type: expected {expected}, found {found}")]
    HeterogeneousArray {
        expected: &'static str,
        found: &'static str,
    },

    #[error("array elements must share one descriptor")]
    MixedArrayDescriptors,

    #[error("{0} values cannot be array elements")]
    UnsupportedArrayElement(&'static str),

    #[error("{type_name} too large to encode: {size} bytes")]
    TooLarge { type_name: &'static str, size: usize },
}

/// Errors raised while building a type registry. These are startup-fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("format code {code:#04x} already registered to '{existing}', cannot register '{rejected}'")]
    DuplicateConstructor {
        code: u8,
        existing: &'static str,
        rejected: &'static str,
    },

    #[error("no constructor registered for required format code {0:#04x}")]
    MissingConstructor(u8),
}

/// Connection-level protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid protocol header: {0:?}")]
    InvalidHeader([u8; 8]),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("frame size {0} smaller than its header")]
    FrameTooSmall(u32),

    #[error("invalid data offset: {0}")]
    InvalidDataOffset(u8),

    #[error("unsupported frame type: {0}")]
    UnsupportedFrameType(u8),

    #[error("unknown performative descriptor: {0:#x}")]
    UnknownPerformative(u64),

    #[error("frame body ends inside a value")]
    TruncatedBody,

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns the error condition reported to the peer before closing.
    pub fn error_condition(&self) -> ErrorCondition {
        match self {
            ProtocolError::InvalidHeader(_) => ErrorCondition::ConnectionFramingError,
            ProtocolError::FrameTooLarge { .. } => ErrorCondition::FrameSizeTooSmall,
            ProtocolError::FrameTooSmall(_)
            | ProtocolError::InvalidDataOffset(_)
            | ProtocolError::UnsupportedFrameType(_) => ErrorCondition::ConnectionFramingError,
            ProtocolError::UnknownPerformative(_) => ErrorCondition::NotImplemented,
            ProtocolError::TruncatedBody | ProtocolError::Decode(_) => ErrorCondition::DecodeError,
            ProtocolError::Encode(_) | ProtocolError::Io(_) => ErrorCondition::InternalError,
        }
    }
}

/// Error conditions carried in `close` and `error` performatives.
///
/// The symbolic names are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCondition {
    DecodeError,
    FrameSizeTooSmall,
    ConnectionFramingError,
    InternalError,
    NotFound,
    NotImplemented,
    InvalidField,
    IllegalState,
    ResourceLimitExceeded,
    TransactionRollback,
}

impl ErrorCondition {
    /// Returns the symbol used on the wire.
    pub fn as_symbol(&self) -> &'static str {
        match self {
            ErrorCondition::DecodeError => "amqp:decode-error",
            ErrorCondition::FrameSizeTooSmall => "amqp:frame-size-too-small",
            ErrorCondition::ConnectionFramingError => "amqp:connection:framing-error",
            ErrorCondition::InternalError => "amqp:internal-error",
            ErrorCondition::NotFound => "amqp:not-found",
            ErrorCondition::NotImplemented => "amqp:not-implemented",
            ErrorCondition::InvalidField => "amqp:invalid-field",
            ErrorCondition::IllegalState => "amqp:illegal-state",
            ErrorCondition::ResourceLimitExceeded => "amqp:resource-limit-exceeded",
            ErrorCondition::TransactionRollback => "amqp:transaction:rollback",
        }
    }

    /// Parses a wire symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let condition = match symbol {
            "amqp:decode-error" => ErrorCondition::DecodeError,
            "amqp:frame-size-too-small" => ErrorCondition::FrameSizeTooSmall,
            "amqp:connection:framing-error" => ErrorCondition::ConnectionFramingError,
            "amqp:internal-error" => ErrorCondition::InternalError,
            "amqp:not-found" => ErrorCondition::NotFound,
            "amqp:not-implemented" => ErrorCondition::NotImplemented,
            "amqp:invalid-field" => ErrorCondition::InvalidField,
            "amqp:illegal-state" => ErrorCondition::IllegalState,
            "amqp:resource-limit-exceeded" => ErrorCondition::ResourceLimitExceeded,
            "amqp:transaction:rollback" => ErrorCondition::TransactionRollback,
            _ => return None,
        };
        Some(condition)
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_condition_symbols_roundtrip() {
        let all = [
            ErrorCondition::DecodeError,
            ErrorCondition::FrameSizeTooSmall,
            ErrorCondition::ConnectionFramingError,
            ErrorCondition::InternalError,
            ErrorCondition::NotFound,
            ErrorCondition::NotImplemented,
            ErrorCondition::InvalidField,
            ErrorCondition::IllegalState,
            ErrorCondition::ResourceLimitExceeded,
            ErrorCondition::TransactionRollback,
        ];
        for condition in all {
            assert_eq!(
                ErrorCondition::from_symbol(condition.as_symbol()),
                Some(condition)
            );
        }
        assert_eq!(ErrorCondition::from_symbol("amqp:bogus"), None);
    }

    #[test]
    fn test_error_condition_display() {
        assert_eq!(
            format!("{}", ErrorCondition::DecodeError),
            "amqp:decode-error"
        );
        assert_eq!(
            format!("{}", ErrorCondition::InternalError),
            "amqp:internal-error"
        );
    }

    #[test]
    fn test_protocol_error_conditions() {
        let err = ProtocolError::Decode(DecodeError::UnknownFormatCode(0x01));
        assert_eq!(err.error_condition(), ErrorCondition::DecodeError);

        let err = ProtocolError::FrameTooLarge { size: 10, max: 5 };
        assert_eq!(err.error_condition(), ErrorCondition::FrameSizeTooSmall);

        let err = ProtocolError::InvalidHeader(*b"HTTP/1.1");
        assert_eq!(err.error_condition(), ErrorCondition::ConnectionFramingError);

        let err = ProtocolError::UnknownPerformative(0x99);
        assert_eq!(err.error_condition(), ErrorCondition::NotImplemented);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::UnknownFormatCode(0x01);
        assert!(err.to_string().contains("0x01"));

        let err = DecodeError::invalid_length("list8", "count exceeds body");
        let msg = err.to_string();
        assert!(msg.contains("list8"));
        assert!(msg.contains("count exceeds body"));

        let err = DecodeError::InvalidChar(0xD800);
        assert!(err.to_string().contains("d800"));

        let err = DecodeError::NestingTooDeep(32);
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::DuplicateConstructor {
            code: 0x71,
            existing: "int",
            rejected: "other-int",
        };
        let msg = err.to_string();
        assert!(msg.contains("0x71"));
        assert!(msg.contains("'int'"));
        assert!(msg.contains("'other-int'"));
    }
}
