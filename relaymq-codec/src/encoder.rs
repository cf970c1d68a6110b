//! Value encoder.
//!
//! Top-level values use the most compact encoding available. Array elements
//! share one element constructor, so they always use the widest encoding of
//! their type.

use crate::error::EncodeError;
use crate::format;
use crate::value::Value;
use bytes::{BufMut, BytesMut};

/// Appends the encoding of `value` to `buf`.
pub fn encode_value(value: &Value, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match value {
        Value::Null => buf.put_u8(format::NULL),
        Value::Boolean(true) => buf.put_u8(format::TRUE),
        Value::Boolean(false) => buf.put_u8(format::FALSE),
        Value::Ubyte(v) => {
            buf.put_u8(format::UBYTE);
            buf.put_u8(*v);
        }
        Value::Ushort(v) => {
            buf.put_u8(format::USHORT);
            buf.put_u16(*v);
        }
        Value::Uint(0) => buf.put_u8(format::UINT0),
        Value::Uint(v) => match u8::try_from(*v) {
            Ok(small) => {
                buf.put_u8(format::SMALL_UINT);
                buf.put_u8(small);
            }
            Err(_) => {
                buf.put_u8(format::UINT);
                buf.put_u32(*v);
            }
        },
        Value::Ulong(0) => buf.put_u8(format::ULONG0),
        Value::Ulong(v) => match u8::try_from(*v) {
            Ok(small) => {
                buf.put_u8(format::SMALL_ULONG);
                buf.put_u8(small);
            }
            Err(_) => {
                buf.put_u8(format::ULONG);
                buf.put_u64(*v);
            }
        },
        Value::Int(v) => match i8::try_from(*v) {
            Ok(small) => {
                buf.put_u8(format::SMALL_INT);
                buf.put_i8(small);
            }
            Err(_) => {
                buf.put_u8(format::INT);
                buf.put_i32(*v);
            }
        },
        Value::Long(v) => match i8::try_from(*v) {
            Ok(small) => {
                buf.put_u8(format::SMALL_LONG);
                buf.put_i8(small);
            }
            Err(_) => {
                buf.put_u8(format::LONG);
                buf.put_i64(*v);
            }
        },
        Value::Binary(b) => put_variable(buf, format::VBIN8, format::VBIN32, "binary", b)?,
        Value::String(s) => put_variable(buf, format::STR8, format::STR32, "string", s.as_bytes())?,
        Value::Symbol(s) => put_variable(buf, format::SYM8, format::SYM32, "symbol", s.as_bytes())?,
        Value::List(items) if items.is_empty() => buf.put_u8(format::LIST0),
        Value::List(items) => {
            let mut body = BytesMut::new();
            for item in items {
                encode_value(item, &mut body)?;
            }
            put_compound(buf, format::LIST8, format::LIST32, "list", items.len(), &body)?;
        }
        Value::Map(entries) => {
            let mut body = BytesMut::new();
            for (key, value) in entries {
                encode_value(key, &mut body)?;
                encode_value(value, &mut body)?;
            }
            put_compound(buf, format::MAP8, format::MAP32, "map", entries.len() * 2, &body)?;
        }
        Value::Array(items) => encode_array(items, buf)?,
        Value::Described(d) => {
            buf.put_u8(format::DESCRIBED);
            encode_value(&d.descriptor, buf)?;
            encode_value(&d.value, buf)?;
        }
        // Remaining primitives have a single encoding
        other => {
            buf.put_u8(element_code(other)?);
            put_untagged(other, buf)?;
        }
    }
    Ok(())
}

fn put_variable(
    buf: &mut BytesMut,
    code8: u8,
    code32: u8,
    type_name: &'static str,
    bytes: &[u8],
) -> Result<(), EncodeError> {
    match u8::try_from(bytes.len()) {
        Ok(len) => {
            buf.put_u8(code8);
            buf.put_u8(len);
        }
        Err(_) => {
            buf.put_u8(code32);
            buf.put_u32(wide_len(type_name, bytes.len())?);
        }
    }
    buf.put_slice(bytes);
    Ok(())
}

/// Writes `code | size | count | body`, using the one-byte form when both
/// size and count fit.
fn put_compound(
    buf: &mut BytesMut,
    code8: u8,
    code32: u8,
    type_name: &'static str,
    count: usize,
    body: &[u8],
) -> Result<(), EncodeError> {
    match (u8::try_from(count), u8::try_from(body.len() + 1)) {
        (Ok(count), Ok(size)) => {
            buf.put_u8(code8);
            buf.put_u8(size);
            buf.put_u8(count);
        }
        _ => {
            buf.put_u8(code32);
            buf.put_u32(wide_len(type_name, body.len() + 4)?);
            buf.put_u32(wide_len(type_name, count)?);
        }
    }
    buf.put_slice(body);
    Ok(())
}

fn wide_len(type_name: &'static str, size: usize) -> Result<u32, EncodeError> {
    u32::try_from(size).map_err(|_| EncodeError::TooLarge { type_name, size })
}

fn encode_array(items: &[Value], buf: &mut BytesMut) -> Result<(), EncodeError> {
    let descriptor = match items.first() {
        Some(Value::Described(d)) => Some(&d.descriptor),
        _ => None,
    };

    let mut elements = Vec::with_capacity(items.len());
    for item in items {
        let element = match (descriptor, item) {
            (Some(expected), Value::Described(d)) if &d.descriptor == expected => &d.value,
            (Some(_), Value::Described(_)) => return Err(EncodeError::MixedArrayDescriptors),
            (None, Value::Described(_)) | (Some(_), _) => {
                return Err(EncodeError::HeterogeneousArray {
                    expected: items[0].type_name(),
                    found: item.type_name(),
                })
            }
            (None, v) => v,
        };
        elements.push(element);
    }

    let mut header = BytesMut::new();
    if let Some(descriptor) = descriptor {
        header.put_u8(format::DESCRIBED);
        encode_value(descriptor, &mut header)?;
    }

    let mut body = BytesMut::new();
    match elements.first() {
        // An empty array still carries an element constructor
        None => header.put_u8(format::NULL),
        Some(first) => {
            let code = element_code(first)?;
            header.put_u8(code);
            for element in &elements {
                if element.type_name() != first.type_name() {
                    return Err(EncodeError::HeterogeneousArray {
                        expected: first.type_name(),
                        found: element.type_name(),
                    });
                }
                put_untagged(element, &mut body)?;
            }
        }
    }

    header.put_slice(&body);
    put_compound(
        buf,
        format::ARRAY8,
        format::ARRAY32,
        "array",
        elements.len(),
        &header,
    )
}

/// Format code used when a value of this type is an array element.
fn element_code(value: &Value) -> Result<u8, EncodeError> {
    let code = match value {
        Value::Boolean(_) => format::BOOLEAN,
        Value::Ubyte(_) => format::UBYTE,
        Value::Ushort(_) => format::USHORT,
        Value::Uint(_) => format::UINT,
        Value::Ulong(_) => format::ULONG,
        Value::Byte(_) => format::BYTE,
        Value::Short(_) => format::SHORT,
        Value::Int(_) => format::INT,
        Value::Long(_) => format::LONG,
        Value::Float(_) => format::FLOAT,
        Value::Double(_) => format::DOUBLE,
        Value::Char(_) => format::CHAR,
        Value::Timestamp(_) => format::TIMESTAMP,
        Value::Uuid(_) => format::UUID,
        Value::Binary(_) => format::VBIN32,
        Value::String(_) => format::STR32,
        Value::Symbol(_) => format::SYM32,
        Value::List(_) => format::LIST32,
        Value::Map(_) => format::MAP32,
        Value::Array(_) => format::ARRAY32,
        Value::Null | Value::Described(_) => {
            return Err(EncodeError::UnsupportedArrayElement(value.type_name()))
        }
    };
    Ok(code)
}

/// Writes the bytes that follow `element_code(value)`.
fn put_untagged(value: &Value, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match value {
        Value::Boolean(v) => buf.put_u8(u8::from(*v)),
        Value::Ubyte(v) => buf.put_u8(*v),
        Value::Ushort(v) => buf.put_u16(*v),
        Value::Uint(v) => buf.put_u32(*v),
        Value::Ulong(v) => buf.put_u64(*v),
        Value::Byte(v) => buf.put_i8(*v),
        Value::Short(v) => buf.put_i16(*v),
        Value::Int(v) => buf.put_i32(*v),
        Value::Long(v) => buf.put_i64(*v),
        Value::Float(v) => buf.put_f32(*v),
        Value::Double(v) => buf.put_f64(*v),
        Value::Char(v) => buf.put_u32(u32::from(*v)),
        Value::Timestamp(v) => buf.put_i64(*v),
        Value::Uuid(v) => buf.put_slice(v.as_bytes()),
        Value::Binary(b) => put_wide_bytes(buf, "binary", b)?,
        Value::String(s) => put_wide_bytes(buf, "string", s.as_bytes())?,
        Value::Symbol(s) => put_wide_bytes(buf, "symbol", s.as_bytes())?,
        Value::List(_) | Value::Map(_) | Value::Array(_) => {
            // Encode compactly, then re-frame with the 32-bit header.
            let mut tmp = BytesMut::new();
            encode_value(value, &mut tmp)?;
            put_wide_compound(buf, value.type_name(), &tmp)?;
        }
        Value::Null | Value::Described(_) => {
            return Err(EncodeError::UnsupportedArrayElement(value.type_name()))
        }
    }
    Ok(())
}

fn put_wide_bytes(buf: &mut BytesMut, type_name: &'static str, bytes: &[u8]) -> Result<(), EncodeError> {
    buf.put_u32(wide_len(type_name, bytes.len())?);
    buf.put_slice(bytes);
    Ok(())
}

/// Rewrites a compactly encoded compound (`list0`, 8-bit or 32-bit form) as
/// `size32 | count32 | body` without its format code.
fn put_wide_compound(buf: &mut BytesMut, type_name: &'static str, encoded: &[u8]) -> Result<(), EncodeError> {
    let (count, body): (u32, &[u8]) = match encoded[0] {
        format::LIST0 => (0, &[]),
        format::LIST8 | format::MAP8 | format::ARRAY8 => (u32::from(encoded[2]), &encoded[3..]),
        _ => (
            u32::from_be_bytes([encoded[5], encoded[6], encoded[7], encoded[8]]),
            &encoded[9..],
        ),
    };
    buf.put_u32(wide_len(type_name, body.len() + 4)?);
    buf.put_u32(count);
    buf.put_slice(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ValueHandler;
    use crate::registry::TypeRegistry;
    use bytes::Bytes;
    use std::sync::Arc;

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_value(value, &mut buf).unwrap();
        buf.to_vec()
    }

    fn decode(bytes: &[u8]) -> Value {
        let handler = ValueHandler::new(Arc::new(TypeRegistry::standard().unwrap()));
        let (value, used) = handler.decode(bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        value
    }

    #[test]
    fn test_compact_integer_encodings() {
        assert_eq!(encode(&Value::Uint(0)), vec![format::UINT0]);
        assert_eq!(encode(&Value::Uint(200)), vec![format::SMALL_UINT, 200]);
        assert_eq!(encode(&Value::Uint(256)), vec![format::UINT, 0, 0, 1, 0]);
        assert_eq!(encode(&Value::Ulong(0)), vec![format::ULONG0]);
        assert_eq!(encode(&Value::Ulong(0x14)), vec![format::SMALL_ULONG, 0x14]);
        assert_eq!(encode(&Value::Int(-1)), vec![format::SMALL_INT, 0xFF]);
        assert_eq!(encode(&Value::Int(128)), vec![format::INT, 0, 0, 0, 128]);
        assert_eq!(encode(&Value::Long(-128)), vec![format::SMALL_LONG, 0x80]);
    }

    #[test]
    fn test_variable_width_switches_to_wide_form() {
        let short = "a".repeat(255);
        assert_eq!(encode(&Value::String(short))[..2], [format::STR8, 255]);

        let long = "a".repeat(256);
        let encoded = encode(&Value::String(long.clone()));
        assert_eq!(encoded[..5], [format::STR32, 0, 0, 1, 0]);
        assert_eq!(decode(&encoded), Value::String(long));
    }

    #[test]
    fn test_list_encoding() {
        let list = Value::List(vec![Value::Uint(7), Value::Boolean(true), Value::Null]);
        assert_eq!(
            encode(&list),
            vec![format::LIST8, 0x05, 0x03, format::SMALL_UINT, 0x07, format::TRUE, format::NULL]
        );
        assert_eq!(encode(&Value::List(vec![])), vec![format::LIST0]);
    }

    #[test]
    fn test_large_list_uses_list32() {
        let list = Value::List(vec![Value::Long(i64::MAX); 40]);
        let encoded = encode(&list);
        assert_eq!(encoded[0], format::LIST32);
        assert_eq!(decode(&encoded), list);
    }

    #[test]
    fn test_array_elements_use_wide_encoding() {
        let array = Value::Array(vec![Value::Uint(1), Value::Uint(2)]);
        let encoded = encode(&array);
        assert_eq!(
            encoded,
            vec![format::ARRAY8, 0x0A, 0x02, format::UINT, 0, 0, 0, 1, 0, 0, 0, 2]
        );
        assert_eq!(decode(&encoded), array);
    }

    #[test]
    fn test_array_of_compounds_decodes() {
        let array = Value::Array(vec![
            Value::List(vec![]),
            Value::List(vec![Value::Symbol("x".into())]),
        ]);
        assert_eq!(decode(&encode(&array)), array);

        let array = Value::Array(vec![Value::Binary(Bytes::from_static(b"ab"))]);
        assert_eq!(decode(&encode(&array)), array);
    }

    #[test]
    fn test_described_array() {
        let array = Value::Array(vec![
            Value::described(Value::Ulong(9), Value::Ubyte(1)),
            Value::described(Value::Ulong(9), Value::Ubyte(2)),
        ]);
        assert_eq!(decode(&encode(&array)), array);
    }

    #[test]
    fn test_empty_array() {
        let encoded = encode(&Value::Array(vec![]));
        assert_eq!(encoded, vec![format::ARRAY8, 0x02, 0x00, format::NULL]);
        assert_eq!(decode(&encoded), Value::Array(vec![]));
    }

    #[test]
    fn test_heterogeneous_array_rejected() {
        let mut buf = BytesMut::new();
        let err = encode_value(
            &Value::Array(vec![Value::Uint(1), Value::from("x")]),
            &mut buf,
        )
        .unwrap_err();
        assert_eq!(
            err,
            EncodeError::HeterogeneousArray {
                expected: "uint",
                found: "string"
            }
        );

        let err = encode_value(
            &Value::Array(vec![
                Value::described(Value::Ulong(1), Value::Uint(1)),
                Value::described(Value::Ulong(2), Value::Uint(1)),
            ]),
            &mut buf,
        )
        .unwrap_err();
        assert_eq!(err, EncodeError::MixedArrayDescriptors);

        let err = encode_value(&Value::Array(vec![Value::Null]), &mut buf).unwrap_err();
        assert_eq!(err, EncodeError::UnsupportedArrayElement("null"));
    }

    #[test]
    fn test_map_encoding() {
        let map = Value::Map(vec![(Value::Symbol("k".into()), Value::Int(-1))]);
        assert_eq!(
            encode(&map),
            vec![format::MAP8, 0x06, 0x02, format::SYM8, 0x01, b'k', format::SMALL_INT, 0xFF]
        );
    }
}
