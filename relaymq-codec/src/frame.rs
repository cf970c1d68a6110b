//! Connection framing.
//!
//! Frame layout (8 bytes header + optional extended header + body):
//!
//! ```text
//! +---------+------+------+---------+
//! | size    | doff | type | channel |
//! | 4 bytes | 1    | 1    | 2 bytes |
//! +---------+------+------+---------+
//! | [extended header] | body        |
//! | doff*4 - 8 bytes  | remainder   |
//! +-------------------+-------------+
//! ```
//!
//! `size` counts the whole frame including the header. `doff` is the body
//! offset in 4-byte words and is at least 2. A frame with an empty body is a
//! heartbeat.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header exchanged by both peers before any frame.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x01\x00\x00";

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

const MIN_DATA_OFFSET: u8 = 2;

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Amqp = 0x00,
    Sasl = 0x01,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameType::Amqp),
            0x01 => Ok(FrameType::Sasl),
            other => Err(ProtocolError::UnsupportedFrameType(other)),
        }
    }
}

/// A parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub channel: u16,
    /// Extended header, zero-padded to a multiple of four bytes on encode.
    pub extended_header: Bytes,
    pub body: Bytes,
}

impl Frame {
    pub fn new(channel: u16, body: Bytes) -> Self {
        Self {
            frame_type: FrameType::Amqp,
            channel,
            extended_header: Bytes::new(),
            body,
        }
    }

    /// Creates an empty-body frame.
    pub fn heartbeat() -> Self {
        Self::new(0, Bytes::new())
    }

    pub fn is_heartbeat(&self) -> bool {
        self.body.is_empty()
    }

    /// Encodes the frame, refusing frames larger than `max_frame_size`.
    pub fn encode(&self, max_frame_size: u32) -> Result<BytesMut, ProtocolError> {
        let ext_words = self.extended_header.len().div_ceil(4);
        let doff = usize::from(MIN_DATA_OFFSET) + ext_words;
        let data_offset =
            u8::try_from(doff).map_err(|_| ProtocolError::InvalidDataOffset(u8::MAX))?;
        let total = doff * 4 + self.body.len();
        let size = u32::try_from(total)
            .ok()
            .filter(|&size| size <= max_frame_size)
            .ok_or(ProtocolError::FrameTooLarge {
                size: u32::try_from(total).unwrap_or(u32::MAX),
                max: max_frame_size,
            })?;

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(size);
        buf.put_u8(data_offset);
        buf.put_u8(self.frame_type as u8);
        buf.put_u16(self.channel);
        buf.put_slice(&self.extended_header);
        buf.put_bytes(0, ext_words * 4 - self.extended_header.len());
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// Nothing is consumed unless a whole frame is returned.
    pub fn decode(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (size as usize) < FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooSmall(size));
        }
        if size > max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: max_frame_size,
            });
        }

        let doff = buf[4];
        let body_offset = usize::from(doff) * 4;
        if doff < MIN_DATA_OFFSET || body_offset > size as usize {
            return Err(ProtocolError::InvalidDataOffset(doff));
        }
        let frame_type = FrameType::try_from(buf[5])?;
        let channel = u16::from_be_bytes([buf[6], buf[7]]);

        if buf.len() < size as usize {
            return Ok(None);
        }

        let mut frame = buf.split_to(size as usize);
        frame.advance(FRAME_HEADER_SIZE);
        let extended_header = frame.split_to(body_offset - FRAME_HEADER_SIZE).freeze();
        let body = frame.freeze();

        Ok(Some(Self {
            frame_type,
            channel,
            extended_header,
            body,
        }))
    }
}
