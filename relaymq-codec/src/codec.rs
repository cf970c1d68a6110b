//! Streaming encoders and decoders for connections.

use crate::encoder::encode_value;
use crate::error::{DecodeError, ProtocolError};
use crate::frame::{Frame, FrameType, PROTOCOL_HEADER};
use crate::handler::ValueHandler;
use crate::performative::Performative;
use crate::value::Value;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encodes performatives into frames.
pub struct Encoder;

impl Encoder {
    /// Appends the protocol header.
    pub fn encode_header(buf: &mut BytesMut) {
        buf.put_slice(&PROTOCOL_HEADER);
    }

    /// Encodes a performative followed by `payload` into one frame.
    pub fn encode_performative(
        channel: u16,
        performative: &Performative,
        payload: &[u8],
        max_frame_size: u32,
    ) -> Result<BytesMut, ProtocolError> {
        let mut body = BytesMut::new();
        encode_value(&performative.to_value(), &mut body)?;
        body.put_slice(payload);
        Frame::new(channel, body.freeze()).encode(max_frame_size)
    }
}

/// A frame body split into its performative and trailing payload.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingFrame {
    pub channel: u16,
    /// `None` for a heartbeat.
    pub performative: Option<Performative>,
    pub payload: Bytes,
}

/// Decodes the byte stream of one connection.
pub struct Decoder {
    buffer: BytesMut,
    handler: ValueHandler,
    max_frame_size: u32,
}

impl Decoder {
    pub fn new(handler: ValueHandler, max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            handler,
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Consumes the peer's protocol header.
    ///
    /// Returns `Ok(None)` until eight bytes have arrived.
    pub fn decode_header(&mut self) -> Result<Option<()>, ProtocolError> {
        if self.buffer.len() < PROTOCOL_HEADER.len() {
            return Ok(None);
        }
        let mut header = [0u8; 8];
        self.buffer.copy_to_slice(&mut header);
        if header != PROTOCOL_HEADER {
            return Err(ProtocolError::InvalidHeader(header));
        }
        Ok(Some(()))
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer, self.max_frame_size)
    }

    /// Attempts to decode the next frame and the performative it carries.
    ///
    /// The whole frame is buffered before its body is decoded, so a body
    /// that ends inside a value is malformed rather than incomplete.
    pub fn decode_performative(&mut self) -> Result<Option<IncomingFrame>, ProtocolError> {
        let Some(frame) = self.decode_frame()? else {
            return Ok(None);
        };
        if frame.frame_type != FrameType::Amqp {
            return Err(ProtocolError::UnsupportedFrameType(frame.frame_type as u8));
        }
        if frame.is_heartbeat() {
            return Ok(Some(IncomingFrame {
                channel: frame.channel,
                performative: None,
                payload: Bytes::new(),
            }));
        }

        let (value, used) = self
            .handler
            .decode(&frame.body)?
            .ok_or(ProtocolError::TruncatedBody)?;
        let performative = Performative::from_value(&value)?;
        Ok(Some(IncomingFrame {
            channel: frame.channel,
            performative: Some(performative),
            payload: frame.body.slice(used..),
        }))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Decodes a stream of bare values, such as message payload sections.
///
/// Bytes are removed from the buffer only once a whole value has decoded.
pub struct ValueDecoder {
    buffer: BytesMut,
    handler: ValueHandler,
}

impl ValueDecoder {
    pub fn new(handler: ValueHandler) -> Self {
        Self {
            buffer: BytesMut::new(),
            handler,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decodes the next value, or returns `Ok(None)` if it is incomplete.
    pub fn decode(&mut self) -> Result<Option<Value>, DecodeError> {
        match self.handler.decode(&self.buffer)? {
            Some((value, used)) => {
                self.buffer.advance(used);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
