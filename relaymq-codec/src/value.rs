//! Decoded protocol values.

use bytes::Bytes;
use uuid::Uuid;

/// A described value: a descriptor followed by the value it annotates.
#[derive(Debug, Clone, PartialEq)]
pub struct Described {
    pub descriptor: Value,
    pub value: Value,
}

/// A typed protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Ubyte(u8),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    Binary(Bytes),
    String(String),
    Symbol(String),
    List(Vec<Value>),
    /// Entries in wire order; keys may be any value.
    Map(Vec<(Value, Value)>),
    /// Homogeneous sequence sharing one element constructor.
    Array(Vec<Value>),
    Described(Box<Described>),
}

impl Value {
    /// Builds a described value.
    pub fn described(descriptor: Value, value: Value) -> Self {
        Value::Described(Box::new(Described { descriptor, value }))
    }

    /// Returns the name of this value's semantic type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Ubyte(_) => "ubyte",
            Value::Ushort(_) => "ushort",
            Value::Uint(_) => "uint",
            Value::Ulong(_) => "ulong",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Char(_) => "char",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Binary(_) => "binary",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Described(_) => "described",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a `u32` if it is an unsigned integer that fits.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Ubyte(v) => Some(u32::from(*v)),
            Value::Ushort(v) => Some(u32::from(*v)),
            Value::Uint(v) => Some(*v),
            Value::Ulong(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as a `u64` if it is an unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Ubyte(v) => Some(u64::from(*v)),
            Value::Ushort(v) => Some(u64::from(*v)),
            Value::Uint(v) => Some(u64::from(*v)),
            Value::Ulong(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text of a string or symbol.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_described(&self) -> Option<&Described> {
        match self {
            Value::Described(d) => Some(d),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Ulong(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Binary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_accessors() {
        assert_eq!(Value::Ubyte(7).as_u32(), Some(7));
        assert_eq!(Value::Ulong(u64::from(u32::MAX) + 1).as_u32(), None);
        assert_eq!(Value::Ulong(9).as_u64(), Some(9));
        assert_eq!(Value::Int(1).as_u32(), None);
    }

    #[test]
    fn test_described_accessor() {
        let value = Value::described(Value::Ulong(0x14), Value::List(vec![]));
        let described = value.as_described().unwrap();
        assert_eq!(described.descriptor, Value::Ulong(0x14));
        assert_eq!(described.value.as_list(), Some(&[][..]));
        assert_eq!(value.type_name(), "described");
    }

    #[test]
    fn test_string_and_symbol_text() {
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::Symbol("amqp:x".into()).as_str(), Some("amqp:x"));
        assert_eq!(Value::Null.as_str(), None);
    }
}
