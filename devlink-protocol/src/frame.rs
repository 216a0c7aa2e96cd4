//! Datagram frame format.
//!
//! Every datagram carries exactly one frame (16 bytes header + payload slice):
//!
//! ```text
//! +--------------+-------------+-------------+------------+
//! | frame_length | frame_index | frame_total | message_id |
//! |   u32 LE     |   u32 LE    |   u32 LE    |   u32 LE   |
//! +--------------+-------------+-------------+------------+
//! | payload (frame_length - 16 bytes)                     |
//! +-------------------------------------------------------+
//! ```
//!
//! `frame_index` is 1-based; `frame_length` counts the header itself.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (4 x u32).
pub const FRAME_HEADER_SIZE: usize = 16;

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header plus payload length in bytes.
    pub length: u32,
    /// Position of this frame within its message, starting at 1.
    pub index: u32,
    /// Number of frames in the message.
    pub total: u32,
    /// Identifier shared by every frame of one message.
    pub message_id: u32,
}

impl FrameHeader {
    /// Builds the header for a frame carrying `payload_len` bytes.
    pub fn new(payload_len: usize, index: u32, total: u32, message_id: u32) -> Self {
        Self {
            length: (FRAME_HEADER_SIZE + payload_len) as u32,
            index,
            total,
            message_id,
        }
    }

    /// Number of payload bytes this header announces.
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(FRAME_HEADER_SIZE)
    }

    pub fn is_first(&self) -> bool {
        self.index == 1
    }

    pub fn is_last(&self) -> bool {
        self.index == self.total
    }

    /// Writes the header into `buf`.
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.index);
        buf.put_u32_le(self.total);
        buf.put_u32_le(self.message_id);
    }

    /// Encodes the header into its fixed 16-byte form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        encode_header(self.length, self.index, self.total, self.message_id)
    }

    /// Decodes a header from the start of `buf`.
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader(buf.len()));
        }

        Ok(Self {
            length: buf.get_u32_le(),
            index: buf.get_u32_le(),
            total: buf.get_u32_le(),
            message_id: buf.get_u32_le(),
        })
    }
}

/// Encodes the four header fields in wire order.
pub fn encode_header(length: u32, index: u32, total: u32, message_id: u32) -> [u8; 16] {
    let mut out = [0u8; FRAME_HEADER_SIZE];
    out[0..4].copy_from_slice(&length.to_le_bytes());
    out[4..8].copy_from_slice(&index.to_le_bytes());
    out[8..12].copy_from_slice(&total.to_le_bytes());
    out[12..16].copy_from_slice(&message_id.to_le_bytes());
    out
}

/// Decodes the header at the start of a datagram.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    FrameHeader::decode(bytes)
}

/// A frame: header plus the payload slice it carries.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame for the given position within a message.
    pub fn new(index: u32, total: u32, message_id: u32, payload: Bytes) -> Self {
        Self {
            header: FrameHeader::new(payload.len(), index, total, message_id),
            payload,
        }
    }

    /// Encodes the frame into one datagram.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.header.put(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Decodes a whole datagram.
    ///
    /// The declared length must match the datagram size exactly.
    pub fn decode(mut datagram: Bytes) -> Result<Self, ProtocolError> {
        let header = FrameHeader::decode(&datagram)?;
        if header.length as usize != datagram.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length,
                actual: datagram.len(),
            });
        }
        datagram.advance(FRAME_HEADER_SIZE);
        Ok(Self {
            header,
            payload: datagram,
        })
    }
}
