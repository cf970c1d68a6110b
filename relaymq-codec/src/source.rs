//! Bounds-checked byte source used by type constructors.

use crate::error::DecodeError;
use crate::DEFAULT_MAX_NESTING_DEPTH;

/// A saved cursor position, used to restart a decode after `NeedMoreData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    position: usize,
    depth: usize,
}

/// Read cursor over the bytes received so far.
///
/// Every read checks availability before consuming: a read that cannot be
/// satisfied returns `None` and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct ByteSource<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> ByteSource<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_max_depth(buf, DEFAULT_MAX_NESTING_DEPTH)
    }

    pub fn with_max_depth(buf: &'a [u8], max_depth: usize) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
            max_depth,
        }
    }

    /// Returns the cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns true if at least `n` unread bytes are available.
    pub fn has_remaining(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    /// Consumes `n` bytes, or returns `None` without consuming anything.
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if !self.has_remaining(n) {
            return None;
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(bytes)
    }

    /// Consumes exactly `N` bytes as an array.
    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    /// Returns the next byte without consuming it.
    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn get_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|b| b[0])
    }

    pub fn get_u16(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn get_u32(&mut self) -> Option<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    pub fn get_u64(&mut self) -> Option<u64> {
        self.read_array().map(u64::from_be_bytes)
    }

    /// Splits off the next `n` bytes as an independent source.
    ///
    /// The child inherits the current nesting depth and limit, and the
    /// parent's cursor moves past the split region.
    pub fn split(&mut self, n: usize) -> Option<ByteSource<'a>> {
        let bytes = self.read_bytes(n)?;
        Some(ByteSource {
            buf: bytes,
            pos: 0,
            depth: self.depth,
            max_depth: self.max_depth,
        })
    }

    /// Saves the cursor so a failed decode can be restarted.
    pub fn mark(&self) -> Mark {
        Mark {
            position: self.pos,
            depth: self.depth,
        }
    }

    /// Restores a cursor saved with [`ByteSource::mark`].
    pub fn reset(&mut self, mark: Mark) {
        self.pos = mark.position;
        self.depth = mark.depth;
    }

    /// Enters a nested value.
    pub fn enter(&mut self) -> Result<(), DecodeError> {
        if self.depth >= self.max_depth {
            return Err(DecodeError::NestingTooDeep(self.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    /// Leaves a nested value entered with [`ByteSource::enter`].
    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Returns the current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }
}
