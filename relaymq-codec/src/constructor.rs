//! Stateless type constructors for the built-in wire types.
//!
//! Each constructor is bound to one format code and holds only immutable
//! configuration (name, widths, a plain function pointer). Constructors for
//! compound types receive the shared [`ValueHandler`] so they can decode
//! their children without holding a registry of their own.
//!
//! A constructor that runs out of input returns `Ok(None)` with the cursor
//! restored to where it started.

use crate::error::DecodeError;
use crate::format;
use crate::handler::ValueHandler;
use crate::source::ByteSource;
use crate::value::Value;
use bytes::Bytes;
use uuid::Uuid;

/// `Ok(Some(v))` on success, `Ok(None)` when more input is needed, `Err` on
/// malformed input.
pub type DecodeResult<T> = Result<Option<T>, DecodeError>;

/// Strategy that turns the bytes following a format code into a value.
pub trait TypeConstructor: Send + Sync {
    /// Name of the wire encoding, used in diagnostics.
    fn type_name(&self) -> &'static str;

    /// Decodes one value. The format code has already been consumed.
    fn construct(&self, src: &mut ByteSource<'_>, handler: &ValueHandler) -> DecodeResult<Value>;

    /// Fewest bytes one value occupies after its format code.
    fn min_width(&self) -> usize {
        1
    }
}

/// Largest element count accepted for an array of zero-width elements.
pub const MAX_ZERO_WIDTH_ARRAY_LEN: usize = 64 * 1024;

/// Width of the size and count fields of variable-width and compound types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeWidth {
    One,
    Four,
}

impl SizeWidth {
    fn read(self, src: &mut ByteSource<'_>) -> Option<usize> {
        match self {
            SizeWidth::One => src.get_u8().map(usize::from),
            SizeWidth::Four => src.get_u32().map(|v| v as usize),
        }
    }

    /// Number of bytes the field occupies on the wire.
    pub fn bytes(self) -> usize {
        match self {
            SizeWidth::One => 1,
            SizeWidth::Four => 4,
        }
    }
}

/// Zero-width encodings whose value is implied by the format code.
#[derive(Debug, Clone, Copy)]
pub struct ConstantConstructor {
    name: &'static str,
    make: fn() -> Value,
}

impl ConstantConstructor {
    pub fn new(name: &'static str, make: fn() -> Value) -> Self {
        Self { name, make }
    }
}

impl TypeConstructor for ConstantConstructor {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn construct(&self, _src: &mut ByteSource<'_>, _handler: &ValueHandler) -> DecodeResult<Value> {
        Ok(Some((self.make)()))
    }

    fn min_width(&self) -> usize {
        0
    }
}

/// Fixed-width primitives: exactly `width` bytes follow the format code.
#[derive(Debug, Clone, Copy)]
pub struct FixedWidthConstructor {
    name: &'static str,
    width: usize,
    read: fn(&[u8]) -> Result<Value, DecodeError>,
}

impl FixedWidthConstructor {
    pub fn new(name: &'static str, width: usize, read: fn(&[u8]) -> Result<Value, DecodeError>) -> Self {
        Self { name, width, read }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl TypeConstructor for FixedWidthConstructor {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn construct(&self, src: &mut ByteSource<'_>, _handler: &ValueHandler) -> DecodeResult<Value> {
        let Some(bytes) = src.read_bytes(self.width) else {
            return Ok(None);
        };
        (self.read)(bytes).map(Some)
    }

    fn min_width(&self) -> usize {
        self.width
    }
}

/// Variable-width primitives: a length prefix followed by that many bytes.
#[derive(Debug, Clone, Copy)]
pub struct VariableWidthConstructor {
    name: &'static str,
    size_width: SizeWidth,
    build: fn(&[u8]) -> Result<Value, DecodeError>,
}

impl VariableWidthConstructor {
    pub fn new(
        name: &'static str,
        size_width: SizeWidth,
        build: fn(&[u8]) -> Result<Value, DecodeError>,
    ) -> Self {
        Self {
            name,
            size_width,
            build,
        }
    }
}

impl TypeConstructor for VariableWidthConstructor {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn construct(&self, src: &mut ByteSource<'_>, _handler: &ValueHandler) -> DecodeResult<Value> {
        let mark = src.mark();
        let Some(len) = self.size_width.read(src) else {
            return Ok(None);
        };
        let Some(bytes) = src.read_bytes(len) else {
            src.reset(mark);
            return Ok(None);
        };
        (self.build)(bytes).map(Some)
    }

    fn min_width(&self) -> usize {
        self.size_width.bytes()
    }
}

/// Which compound a [`CompoundConstructor`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundKind {
    List,
    Map,
}

/// Lists and maps: `size | count | count encoded values`, where `size`
/// covers the count field and the elements.
#[derive(Debug, Clone, Copy)]
pub struct CompoundConstructor {
    name: &'static str,
    size_width: SizeWidth,
    kind: CompoundKind,
}

impl CompoundConstructor {
    pub fn new(name: &'static str, size_width: SizeWidth, kind: CompoundKind) -> Self {
        Self {
            name,
            size_width,
            kind,
        }
    }
}

impl TypeConstructor for CompoundConstructor {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn construct(&self, src: &mut ByteSource<'_>, handler: &ValueHandler) -> DecodeResult<Value> {
        let mark = src.mark();
        let Some(size) = self.size_width.read(src) else {
            return Ok(None);
        };
        // The whole body must be present before any element is decoded, so a
        // short read inside the body is a grammar violation, not a retry.
        let Some(mut body) = src.split(size) else {
            src.reset(mark);
            return Ok(None);
        };

        let count = read_count(&mut body, self.size_width, self.name, size)?;
        if count > body.remaining() {
            return Err(DecodeError::invalid_length(
                self.name,
                format!("count {} exceeds {} body bytes", count, body.remaining()),
            ));
        }
        if self.kind == CompoundKind::Map && count % 2 != 0 {
            return Err(DecodeError::OddMapCount(count as u32));
        }

        body.enter()?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let item = handler
                .parse(&mut body)?
                .ok_or_else(|| overrun(self.name))?;
            items.push(item);
        }
        expect_consumed(&body, self.name)?;

        let value = match self.kind {
            CompoundKind::List => Value::List(items),
            CompoundKind::Map => {
                let mut entries = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    entries.push((key, value));
                }
                Value::Map(entries)
            }
        };
        Ok(Some(value))
    }
}

/// Arrays: `size | count | element constructor | count untagged elements`.
///
/// The element constructor may itself be described, in which case every
/// element shares the descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ArrayConstructor {
    name: &'static str,
    size_width: SizeWidth,
}

impl ArrayConstructor {
    pub fn new(name: &'static str, size_width: SizeWidth) -> Self {
        Self { name, size_width }
    }
}

impl TypeConstructor for ArrayConstructor {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn construct(&self, src: &mut ByteSource<'_>, handler: &ValueHandler) -> DecodeResult<Value> {
        let mark = src.mark();
        let Some(size) = self.size_width.read(src) else {
            return Ok(None);
        };
        let Some(mut body) = src.split(size) else {
            src.reset(mark);
            return Ok(None);
        };

        let count = read_count(&mut body, self.size_width, self.name, size)?;
        body.enter()?;

        let mut code = body.get_u8().ok_or_else(|| {
            DecodeError::invalid_length(self.name, "missing element constructor")
        })?;
        let descriptor = if code == format::DESCRIBED {
            let descriptor = handler
                .parse(&mut body)?
                .ok_or_else(|| overrun(self.name))?;
            code = body.get_u8().ok_or_else(|| {
                DecodeError::invalid_length(self.name, "missing element constructor")
            })?;
            Some(descriptor)
        } else {
            None
        };
        if code == format::DESCRIBED {
            return Err(DecodeError::UnexpectedValue {
                expected: "primitive element constructor",
                actual: "described".to_string(),
            });
        }
        let element = handler.registry().lookup(code)?;

        // Zero-width elements take no body bytes, so only a fixed cap bounds them
        let min_width = element.min_width();
        if min_width == 0 {
            if count > MAX_ZERO_WIDTH_ARRAY_LEN {
                return Err(DecodeError::invalid_length(
                    self.name,
                    format!(
                        "count {} of {} elements exceeds {}",
                        count,
                        element.type_name(),
                        MAX_ZERO_WIDTH_ARRAY_LEN
                    ),
                ));
            }
        } else if count.saturating_mul(min_width) > body.remaining() {
            return Err(DecodeError::invalid_length(
                self.name,
                format!("count {} exceeds {} body bytes", count, body.remaining()),
            ));
        }

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let item = element
                .construct(&mut body, handler)?
                .ok_or_else(|| overrun(self.name))?;
            items.push(match &descriptor {
                Some(d) => Value::described(d.clone(), item),
                None => item,
            });
        }
        expect_consumed(&body, self.name)?;

        Ok(Some(Value::Array(items)))
    }
}

/// Described types: a descriptor value followed by the described value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescribedConstructor;

impl TypeConstructor for DescribedConstructor {
    fn type_name(&self) -> &'static str {
        "described"
    }

    fn construct(&self, src: &mut ByteSource<'_>, handler: &ValueHandler) -> DecodeResult<Value> {
        let mark = src.mark();
        src.enter()?;
        let Some(descriptor) = handler.parse(src)? else {
            src.reset(mark);
            return Ok(None);
        };
        let Some(value) = handler.parse(src)? else {
            src.reset(mark);
            return Ok(None);
        };
        src.leave();
        Ok(Some(Value::described(descriptor, value)))
    }
}

fn read_count(
    body: &mut ByteSource<'_>,
    width: SizeWidth,
    name: &'static str,
    size: usize,
) -> Result<usize, DecodeError> {
    width.read(body).ok_or_else(|| {
        DecodeError::invalid_length(name, format!("size {} too small for count field", size))
    })
}

fn overrun(name: &'static str) -> DecodeError {
    DecodeError::invalid_length(name, "element overruns declared size")
}

fn expect_consumed(body: &ByteSource<'_>, name: &'static str) -> Result<(), DecodeError> {
    if body.remaining() != 0 {
        return Err(DecodeError::invalid_length(
            name,
            format!("{} trailing bytes after last element", body.remaining()),
        ));
    }
    Ok(())
}

fn be<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

pub(crate) fn read_boolean(b: &[u8]) -> Result<Value, DecodeError> {
    match b[0] {
        0x00 => Ok(Value::Boolean(false)),
        0x01 => Ok(Value::Boolean(true)),
        other => Err(DecodeError::InvalidBoolean(other)),
    }
}

pub(crate) fn read_ubyte(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Ubyte(b[0]))
}

pub(crate) fn read_ushort(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Ushort(u16::from_be_bytes(be(b))))
}

pub(crate) fn read_uint(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Uint(u32::from_be_bytes(be(b))))
}

pub(crate) fn read_small_uint(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Uint(u32::from(b[0])))
}

pub(crate) fn read_ulong(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Ulong(u64::from_be_bytes(be(b))))
}

pub(crate) fn read_small_ulong(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Ulong(u64::from(b[0])))
}

pub(crate) fn read_byte(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Byte(b[0] as i8))
}

pub(crate) fn read_short(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Short(i16::from_be_bytes(be(b))))
}

pub(crate) fn read_int(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Int(i32::from_be_bytes(be(b))))
}

pub(crate) fn read_small_int(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Int(i32::from(b[0] as i8)))
}

pub(crate) fn read_long(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Long(i64::from_be_bytes(be(b))))
}

pub(crate) fn read_small_long(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Long(i64::from(b[0] as i8)))
}

pub(crate) fn read_float(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Float(f32::from_be_bytes(be(b))))
}

pub(crate) fn read_double(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Double(f64::from_be_bytes(be(b))))
}

pub(crate) fn read_char(b: &[u8]) -> Result<Value, DecodeError> {
    let code_point = u32::from_be_bytes(be(b));
    char::from_u32(code_point)
        .map(Value::Char)
        .ok_or(DecodeError::InvalidChar(code_point))
}

pub(crate) fn read_timestamp(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Timestamp(i64::from_be_bytes(be(b))))
}

pub(crate) fn read_uuid(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Uuid(Uuid::from_bytes(be(b))))
}

pub(crate) fn build_binary(b: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Binary(Bytes::copy_from_slice(b)))
}

pub(crate) fn build_string(b: &[u8]) -> Result<Value, DecodeError> {
    std::str::from_utf8(b)
        .map(|s| Value::String(s.to_string()))
        .map_err(|_| DecodeError::InvalidUtf8("string"))
}

pub(crate) fn build_symbol(b: &[u8]) -> Result<Value, DecodeError> {
    if !b.is_ascii() {
        return Err(DecodeError::InvalidSymbol);
    }
    std::str::from_utf8(b)
        .map(|s| Value::Symbol(s.to_string()))
        .map_err(|_| DecodeError::InvalidUtf8("symbol"))
}
