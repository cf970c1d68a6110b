//! # relaymq-codec
//!
//! Wire codec for relaymq.
//!
//! This crate provides:
//! - A bounds-checked, cursor-advancing byte source
//! - A registry of stateless type constructors keyed by format code
//! - A value handler that decodes typed values from possibly-incomplete input
//! - A value encoder producing the most compact encoding
//! - Frame encoding/decoding and the performatives carried in frame bodies
//! - Error types and the error conditions reported to peers

pub mod codec;
pub mod constructor;
pub mod encoder;
pub mod error;
pub mod format;
pub mod frame;
pub mod handler;
pub mod performative;
pub mod registry;
pub mod source;
pub mod value;

pub use codec::{Decoder, Encoder, IncomingFrame, ValueDecoder};
pub use constructor::{DecodeResult, TypeConstructor};
pub use encoder::encode_value;
pub use error::{DecodeError, EncodeError, ErrorCondition, ProtocolError, RegistryError};
pub use frame::{Frame, FrameType, FRAME_HEADER_SIZE, PROTOCOL_HEADER};
pub use handler::ValueHandler;
pub use performative::{Close, Discharge, Disposition, ErrorInfo, Performative, Role, Transfer};
pub use registry::TypeRegistry;
pub use source::{ByteSource, Mark};
pub use value::{Described, Value};

/// Default maximum frame size (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Smallest maximum frame size a peer may negotiate.
pub const MIN_MAX_FRAME_SIZE: u32 = 512;

/// Default limit on nested compound/described values.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 32;
