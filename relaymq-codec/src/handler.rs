//! Value handler: drives the type registry against a byte source.

use crate::constructor::DecodeResult;
use crate::registry::TypeRegistry;
use crate::source::ByteSource;
use crate::value::Value;
use crate::DEFAULT_MAX_NESTING_DEPTH;
use std::sync::Arc;

/// Decodes values from a byte source using a shared type registry.
///
/// The handler owns no per-decode state: all progress lives in the
/// [`ByteSource`], so one handler can serve many connections at once.
#[derive(Debug, Clone)]
pub struct ValueHandler {
    registry: Arc<TypeRegistry>,
    max_depth: usize,
}

impl ValueHandler {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            max_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }

    /// Sets the nesting limit applied to sources created by [`ValueHandler::decode`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Returns the registry constructors are looked up in.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decodes the next value from `src`.
    ///
    /// On `Ok(None)` the cursor is back where it started, so the call can be
    /// repeated unchanged once more bytes are available.
    pub fn parse(&self, src: &mut ByteSource<'_>) -> DecodeResult<Value> {
        let mark = src.mark();
        let Some(code) = src.get_u8() else {
            return Ok(None);
        };
        let constructor = self.registry.lookup(code)?;
        match constructor.construct(src, self)? {
            Some(value) => Ok(Some(value)),
            None => {
                src.reset(mark);
                Ok(None)
            }
        }
    }

    /// Decodes one value from the start of `bytes`, returning it with the
    /// number of bytes it occupied.
    pub fn decode(&self, bytes: &[u8]) -> DecodeResult<(Value, usize)> {
        let mut src = ByteSource::with_max_depth(bytes, self.max_depth);
        Ok(self.parse(&mut src)?.map(|value| (value, src.position())))
    }
}
