//! Performatives carried at the start of a frame body.
//!
//! Each performative is a described list whose descriptor is a `ulong`
//! code. Trailing list fields may be omitted and read as null.

use crate::error::{DecodeError, ErrorCondition, ProtocolError};
use crate::value::Value;

pub const TRANSFER: u64 = 0x14;
pub const DISPOSITION: u64 = 0x15;
pub const CLOSE: u64 = 0x18;
pub const ERROR: u64 = 0x1d;
pub const DISCHARGE: u64 = 0x32;

/// Delivers one message to an address. The message payload follows the
/// performative in the frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub delivery_id: u32,
    pub address: Option<String>,
}

/// Which end of a link issued a disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    fn as_bool(self) -> bool {
        self == Role::Receiver
    }
}

/// Reports the outcome of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub role: Role,
    pub first: u32,
    pub settled: bool,
}

/// Ends the current transaction: commit when `fail` is false, roll back
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discharge {
    pub fail: bool,
}

/// Error details attached to a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub condition: String,
    pub description: Option<String>,
}

impl ErrorInfo {
    pub fn new(condition: ErrorCondition, description: impl Into<String>) -> Self {
        Self {
            condition: condition.as_symbol().to_string(),
            description: Some(description.into()),
        }
    }

    /// Returns the condition if it is one this broker knows.
    pub fn known_condition(&self) -> Option<ErrorCondition> {
        ErrorCondition::from_symbol(&self.condition)
    }

    fn to_value(&self) -> Value {
        Value::described(
            Value::Ulong(ERROR),
            Value::List(vec![
                Value::Symbol(self.condition.clone()),
                optional_string(&self.description),
            ]),
        )
    }

    fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let (code, fields) = described_list(value)?;
        if code != ERROR {
            return Err(unexpected("error", value).into());
        }
        let condition = match field(fields, 0) {
            Value::Symbol(s) => s.clone(),
            other => return Err(unexpected("symbol condition", other).into()),
        };
        Ok(Self {
            condition,
            description: read_optional_string(field(fields, 1), "string description")?,
        })
    }
}

/// Closes the connection, optionally reporting why.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Close {
    pub error: Option<ErrorInfo>,
}

/// A decoded performative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Performative {
    Transfer(Transfer),
    Disposition(Disposition),
    Discharge(Discharge),
    Close(Close),
}

impl Performative {
    pub fn name(&self) -> &'static str {
        match self {
            Performative::Transfer(_) => "transfer",
            Performative::Disposition(_) => "disposition",
            Performative::Discharge(_) => "discharge",
            Performative::Close(_) => "close",
        }
    }

    /// Converts to the described list sent on the wire.
    pub fn to_value(&self) -> Value {
        let (code, fields) = match self {
            Performative::Transfer(t) => (
                TRANSFER,
                vec![Value::Uint(t.delivery_id), optional_string(&t.address)],
            ),
            Performative::Disposition(d) => (
                DISPOSITION,
                vec![
                    Value::Boolean(d.role.as_bool()),
                    Value::Uint(d.first),
                    Value::Boolean(d.settled),
                ],
            ),
            Performative::Discharge(d) => (DISCHARGE, vec![Value::Boolean(d.fail)]),
            Performative::Close(c) => (
                CLOSE,
                vec![c.error.as_ref().map_or(Value::Null, ErrorInfo::to_value)],
            ),
        };
        Value::described(Value::Ulong(code), Value::List(fields))
    }

    /// Interprets a decoded value as a performative.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let (code, fields) = described_list(value)?;
        let performative = match code {
            TRANSFER => Performative::Transfer(Transfer {
                delivery_id: read_uint(field(fields, 0), "uint delivery-id")?,
                address: read_optional_string(field(fields, 1), "string address")?,
            }),
            DISPOSITION => Performative::Disposition(Disposition {
                role: match read_bool(field(fields, 0), "boolean role")? {
                    true => Role::Receiver,
                    false => Role::Sender,
                },
                first: read_uint(field(fields, 1), "uint first")?,
                settled: read_optional_bool(field(fields, 2), "boolean settled")?,
            }),
            DISCHARGE => Performative::Discharge(Discharge {
                fail: read_optional_bool(field(fields, 0), "boolean fail")?,
            }),
            CLOSE => Performative::Close(Close {
                error: match field(fields, 0) {
                    Value::Null => None,
                    other => Some(ErrorInfo::from_value(other)?),
                },
            }),
            other => return Err(ProtocolError::UnknownPerformative(other)),
        };
        Ok(performative)
    }
}

impl From<Transfer> for Performative {
    fn from(t: Transfer) -> Self {
        Performative::Transfer(t)
    }
}

impl From<Disposition> for Performative {
    fn from(d: Disposition) -> Self {
        Performative::Disposition(d)
    }
}

impl From<Discharge> for Performative {
    fn from(d: Discharge) -> Self {
        Performative::Discharge(d)
    }
}

impl From<Close> for Performative {
    fn from(c: Close) -> Self {
        Performative::Close(c)
    }
}

static NULL: Value = Value::Null;

fn field(fields: &[Value], index: usize) -> &Value {
    fields.get(index).unwrap_or(&NULL)
}

fn described_list(value: &Value) -> Result<(u64, &[Value]), DecodeError> {
    let described = value
        .as_described()
        .ok_or_else(|| unexpected("described list", value))?;
    let code = match &described.descriptor {
        Value::Ulong(code) => *code,
        other => return Err(unexpected("ulong descriptor", other)),
    };
    let fields = described
        .value
        .as_list()
        .ok_or_else(|| unexpected("list", &described.value))?;
    Ok((code, fields))
}

fn unexpected(expected: &'static str, actual: &Value) -> DecodeError {
    DecodeError::UnexpectedValue {
        expected,
        actual: actual.type_name().to_string(),
    }
}

fn read_uint(value: &Value, expected: &'static str) -> Result<u32, DecodeError> {
    match value {
        Value::Uint(v) => Ok(*v),
        other => Err(unexpected(expected, other)),
    }
}

fn read_bool(value: &Value, expected: &'static str) -> Result<bool, DecodeError> {
    value.as_bool().ok_or_else(|| unexpected(expected, value))
}

fn read_optional_bool(value: &Value, expected: &'static str) -> Result<bool, DecodeError> {
    match value {
        Value::Null => Ok(false),
        other => read_bool(other, expected),
    }
}

fn read_optional_string(value: &Value, expected: &'static str) -> Result<Option<String>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(unexpected(expected, other)),
    }
}

fn optional_string(value: &Option<String>) -> Value {
    value.as_ref().map_or(Value::Null, |s| Value::String(s.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_value_layout() {
        let transfer = Performative::from(Transfer {
            delivery_id: 7,
            address: Some("orders".into()),
        });
        let value = transfer.to_value();
        let described = value.as_described().unwrap();
        assert_eq!(described.descriptor, Value::Ulong(TRANSFER));
        assert_eq!(
            described.value.as_list().unwrap(),
            &[Value::Uint(7), Value::String("orders".into())]
        );
        assert_eq!(Performative::from_value(&value).unwrap(), transfer);
    }

    #[test]
    fn test_omitted_trailing_fields_read_as_null() {
        let value = Value::described(Value::Ulong(DISCHARGE), Value::List(vec![]));
        assert_eq!(
            Performative::from_value(&value).unwrap(),
            Performative::Discharge(Discharge { fail: false })
        );

        let value = Value::described(Value::Ulong(TRANSFER), Value::List(vec![Value::Uint(1)]));
        assert_eq!(
            Performative::from_value(&value).unwrap(),
            Performative::Transfer(Transfer {
                delivery_id: 1,
                address: None
            })
        );
    }

    #[test]
    fn test_close_with_error() {
        let close = Performative::Close(Close {
            error: Some(ErrorInfo::new(ErrorCondition::DecodeError, "bad format code")),
        });
        let decoded = Performative::from_value(&close.to_value()).unwrap();
        let Performative::Close(Close { error: Some(error) }) = &decoded else {
            panic!("expected close with error, got {:?}", decoded);
        };
        assert_eq!(error.condition, "amqp:decode-error");
        assert_eq!(error.known_condition(), Some(ErrorCondition::DecodeError));
        assert_eq!(error.description.as_deref(), Some("bad format code"));
    }

    #[test]
    fn test_disposition_role() {
        let disposition = Performative::Disposition(Disposition {
            role: Role::Receiver,
            first: 3,
            settled: true,
        });
        let value = disposition.to_value();
        assert_eq!(value.as_described().unwrap().value.as_list().unwrap()[0], Value::Boolean(true));
        assert_eq!(Performative::from_value(&value).unwrap(), disposition);
    }

    #[test]
    fn test_unknown_descriptor() {
        let value = Value::described(Value::Ulong(0x10), Value::List(vec![]));
        assert!(matches!(
            Performative::from_value(&value),
            Err(ProtocolError::UnknownPerformative(0x10))
        ));
    }

    #[test]
    fn test_rejects_non_performative_values() {
        assert!(matches!(
            Performative::from_value(&Value::Uint(1)),
            Err(ProtocolError::Decode(DecodeError::UnexpectedValue { .. }))
        ));

        let symbolic = Value::described(Value::Symbol("amqp:transfer:list".into()), Value::List(vec![]));
        assert!(matches!(
            Performative::from_value(&symbolic),
            Err(ProtocolError::Decode(DecodeError::UnexpectedValue {
                expected: "ulong descriptor",
                ..
            }))
        ));

        let bad_field = Value::described(Value::Ulong(TRANSFER), Value::List(vec![Value::from("x")]));
        assert!(matches!(
            Performative::from_value(&bad_field),
            Err(ProtocolError::Decode(DecodeError::UnexpectedValue {
                expected: "uint delivery-id",
                ..
            }))
        ));
    }
}
