//! Registry mapping format codes to type constructors.

use crate::constructor::{
    build_binary, build_string, build_symbol, read_boolean, read_byte, read_char, read_double,
    read_float, read_int, read_long, read_short, read_small_int, read_small_long,
    read_small_uint, read_small_ulong, read_timestamp, read_ubyte, read_uint, read_ulong,
    read_ushort, read_uuid, ArrayConstructor, CompoundConstructor, CompoundKind,
    ConstantConstructor, DescribedConstructor, FixedWidthConstructor, SizeWidth,
    TypeConstructor, VariableWidthConstructor,
};
use crate::error::{DecodeError, RegistryError};
use crate::format;
use crate::value::Value;
use std::fmt;

type ReadFn = fn(&[u8]) -> Result<Value, DecodeError>;

/// Format code → constructor table.
///
/// Built once at startup and read-only afterwards, so it can be shared
/// across connection workers without synchronization.
pub struct TypeRegistry {
    constructors: [Option<Box<dyn TypeConstructor>>; 256],
}

impl TypeRegistry {
    /// Creates a registry with no constructors.
    pub fn empty() -> Self {
        Self {
            constructors: std::array::from_fn(|_| None),
        }
    }

    /// Creates a registry holding every built-in constructor.
    pub fn standard() -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        registry.register_builtins()?;
        registry.verify(format::REQUIRED)?;
        Ok(registry)
    }

    fn register_builtins(&mut self) -> Result<(), RegistryError> {
        use CompoundKind::{List, Map};
        use SizeWidth::{Four, One};

        self.register(format::DESCRIBED, DescribedConstructor)?;

        // Zero-width encodings
        self.register(format::NULL, ConstantConstructor::new("null", || Value::Null))?;
        self.register(format::TRUE, ConstantConstructor::new("true", || Value::Boolean(true)))?;
        self.register(format::FALSE, ConstantConstructor::new("false", || Value::Boolean(false)))?;
        self.register(format::UINT0, ConstantConstructor::new("uint0", || Value::Uint(0)))?;
        self.register(format::ULONG0, ConstantConstructor::new("ulong0", || Value::Ulong(0)))?;
        self.register(format::LIST0, ConstantConstructor::new("list0", || Value::List(Vec::new())))?;

        // Fixed-width encodings
        let fixed: [(u8, &'static str, usize, ReadFn); 18] = [
            (format::BOOLEAN, "boolean", 1, read_boolean),
            (format::UBYTE, "ubyte", 1, read_ubyte),
            (format::BYTE, "byte", 1, read_byte),
            (format::SMALL_UINT, "smalluint", 1, read_small_uint),
            (format::SMALL_ULONG, "smallulong", 1, read_small_ulong),
            (format::SMALL_INT, "smallint", 1, read_small_int),
            (format::SMALL_LONG, "smalllong", 1, read_small_long),
            (format::USHORT, "ushort", 2, read_ushort),
            (format::SHORT, "short", 2, read_short),
            (format::UINT, "uint", 4, read_uint),
            (format::INT, "int", 4, read_int),
            (format::FLOAT, "float", 4, read_float),
            (format::CHAR, "char", 4, read_char),
            (format::ULONG, "ulong", 8, read_ulong),
            (format::LONG, "long", 8, read_long),
            (format::DOUBLE, "double", 8, read_double),
            (format::TIMESTAMP, "timestamp", 8, read_timestamp),
            (format::UUID, "uuid", 16, read_uuid),
        ];
        for (code, name, width, read) in fixed {
            self.register(code, FixedWidthConstructor::new(name, width, read))?;
        }

        // Variable-width encodings
        let variable: [(u8, &'static str, SizeWidth, ReadFn); 6] = [
            (format::VBIN8, "vbin8", One, build_binary),
            (format::VBIN32, "vbin32", Four, build_binary),
            (format::STR8, "str8-utf8", One, build_string),
            (format::STR32, "str32-utf8", Four, build_string),
            (format::SYM8, "sym8", One, build_symbol),
            (format::SYM32, "sym32", Four, build_symbol),
        ];
        for (code, name, width, build) in variable {
            self.register(code, VariableWidthConstructor::new(name, width, build))?;
        }

        // Compound and array encodings
        self.register(format::LIST8, CompoundConstructor::new("list8", One, List))?;
        self.register(format::LIST32, CompoundConstructor::new("list32", Four, List))?;
        self.register(format::MAP8, CompoundConstructor::new("map8", One, Map))?;
        self.register(format::MAP32, CompoundConstructor::new("map32", Four, Map))?;
        self.register(format::ARRAY8, ArrayConstructor::new("array8", One))?;
        self.register(format::ARRAY32, ArrayConstructor::new("array32", Four))?;

        Ok(())
    }

    /// Binds a constructor to a format code.
    ///
    /// Registering a second constructor for the same code is a configuration
    /// error; the process should refuse to start.
    pub fn register<C>(&mut self, code: u8, constructor: C) -> Result<(), RegistryError>
    where
        C: TypeConstructor + 'static,
    {
        let slot = &mut self.constructors[usize::from(code)];
        if let Some(existing) = slot {
            return Err(RegistryError::DuplicateConstructor {
                code,
                existing: existing.type_name(),
                rejected: constructor.type_name(),
            });
        }
        *slot = Some(Box::new(constructor));
        Ok(())
    }

    /// Returns the constructor for a format code, if registered.
    pub fn get(&self, code: u8) -> Option<&dyn TypeConstructor> {
        self.constructors[usize::from(code)].as_deref()
    }

    /// Returns the constructor for a format code, or a decode error for an
    /// unregistered code.
    pub fn lookup(&self, code: u8) -> Result<&dyn TypeConstructor, DecodeError> {
        self.get(code).ok_or(DecodeError::UnknownFormatCode(code))
    }

    /// Checks that every required format code has a constructor.
    pub fn verify(&self, required: &[u8]) -> Result<(), RegistryError> {
        match required.iter().find(|&&code| self.get(code).is_none()) {
            Some(&code) => Err(RegistryError::MissingConstructor(code)),
            None => Ok(()),
        }
    }

    /// Returns the number of registered format codes.
    pub fn len(&self) -> usize {
        self.constructors.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (code, ctor) in self.constructors.iter().enumerate() {
            if let Some(ctor) = ctor {
                map.entry(&format_args!("{:#04x}", code), &ctor.type_name());
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_is_complete() {
        let registry = TypeRegistry::standard().unwrap();
        assert_eq!(registry.len(), format::REQUIRED.len());
        assert_eq!(registry.lookup(format::INT).unwrap().type_name(), "int");
        assert_eq!(registry.lookup(format::LIST32).unwrap().type_name(), "list32");
    }

    #[test]
    fn test_unregistered_code_is_decode_error() {
        let registry = TypeRegistry::standard().unwrap();
        assert!(matches!(
            registry.lookup(0x01),
            Err(DecodeError::UnknownFormatCode(0x01))
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = TypeRegistry::empty();
        registry
            .register(format::INT, FixedWidthConstructor::new("int", 4, read_int))
            .unwrap();
        let err = registry
            .register(format::INT, FixedWidthConstructor::new("custom-int", 4, read_int))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateConstructor {
                code: format::INT,
                existing: "int",
                rejected: "custom-int",
            }
        );
        // The original registration is kept
        assert_eq!(registry.lookup(format::INT).unwrap().type_name(), "int");
    }

    #[test]
    fn test_verify_reports_missing_code() {
        let mut registry = TypeRegistry::empty();
        assert!(registry.is_empty());
        registry
            .register(format::NULL, ConstantConstructor::new("null", || Value::Null))
            .unwrap();
        assert_eq!(registry.verify(&[format::NULL]), Ok(()));
        assert_eq!(
            registry.verify(&[format::NULL, format::UINT]),
            Err(RegistryError::MissingConstructor(format::UINT))
        );
    }

    #[test]
    fn test_debug_lists_codes() {
        let registry = TypeRegistry::standard().unwrap();
        let debug = format!("{:?}", registry);
        assert!(debug.contains("0x71"));
        assert!(debug.contains("\"int\""));
    }
}
