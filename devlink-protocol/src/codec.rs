//! Segmentation and reassembly of messages.
//!
//! [`Encoder`] splits a message payload into an ordered run of frames, one per
//! datagram. [`Decoder`] consumes datagrams one at a time and validates that
//! they form a contiguous sequence of a single message before handing back the
//! concatenated payload.

use crate::error::ProtocolError;
use crate::frame::{Frame, FrameHeader, FRAME_HEADER_SIZE};
use crate::MAX_UDP_PAYLOAD;
use bytes::{BufMut, Bytes, BytesMut};

/// Splits message payloads into frames no larger than `frame_max_bytes`.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    frame_max_bytes: usize,
}

impl Encoder {
    /// Creates an encoder for the given per-datagram ceiling.
    pub fn new(frame_max_bytes: usize) -> Result<Self, ProtocolError> {
        if frame_max_bytes <= FRAME_HEADER_SIZE || frame_max_bytes > MAX_UDP_PAYLOAD {
            return Err(ProtocolError::InvalidFrameSize {
                size: frame_max_bytes,
                min: FRAME_HEADER_SIZE + 1,
                max: MAX_UDP_PAYLOAD,
            });
        }
        Ok(Self { frame_max_bytes })
    }

    pub fn frame_max_bytes(&self) -> usize {
        self.frame_max_bytes
    }

    /// Payload bytes that fit in one frame.
    pub fn max_frame_payload(&self) -> usize {
        self.frame_max_bytes - FRAME_HEADER_SIZE
    }

    /// Number of frames needed for a payload; at least one, even when empty.
    pub fn frame_count(&self, payload_len: usize) -> Result<u32, ProtocolError> {
        let frames = payload_len.div_ceil(self.max_frame_payload()).max(1);
        u32::try_from(frames).map_err(|_| ProtocolError::MessageTooLarge(payload_len))
    }

    /// Returns an iterator over the encoded frames of one message.
    pub fn segment<'a>(
        &self,
        message_id: u32,
        payload: &'a [u8],
    ) -> Result<Segments<'a>, ProtocolError> {
        let total = self.frame_count(payload.len())?;
        Ok(Segments {
            payload,
            chunk: self.max_frame_payload(),
            index: 0,
            total,
            message_id,
        })
    }
}

/// Iterator produced by [`Encoder::segment`], yielding one datagram per frame.
#[derive(Debug)]
pub struct Segments<'a> {
    payload: &'a [u8],
    chunk: usize,
    index: u32,
    total: u32,
    message_id: u32,
}

impl Segments<'_> {
    pub fn total(&self) -> u32 {
        self.total
    }
}

impl Iterator for Segments<'_> {
    type Item = BytesMut;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.total {
            return None;
        }

        let start = self.index as usize * self.chunk;
        let end = (start + self.chunk).min(self.payload.len());
        let slice = self.payload.get(start..end).unwrap_or_default();
        self.index += 1;

        let header = FrameHeader::new(slice.len(), self.index, self.total, self.message_id);
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + slice.len());
        header.put(&mut buf);
        buf.put_slice(slice);
        Some(buf)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Segments<'_> {}

/// A fully reassembled message payload.
#[derive(Debug, Clone)]
pub struct Assembled {
    /// Header of the frame that completed the message.
    pub last_header: FrameHeader,
    /// Concatenated frame payloads.
    pub payload: Bytes,
}

impl Assembled {
    pub fn message_id(&self) -> u32 {
        self.last_header.message_id
    }
}

/// Result of feeding one datagram to the [`Decoder`].
#[derive(Debug)]
pub enum Progress {
    /// More frames are needed.
    Incomplete,
    /// The message is complete.
    Complete(Assembled),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitFirst,
    Accumulating {
        message_id: u32,
        total: u32,
        next_index: u32,
    },
}

/// Reassembly state machine for one message at a time.
///
/// Interleaved messages are not supported: any frame that does not continue
/// the current sequence aborts it and the partial payload is discarded.
#[derive(Debug)]
pub struct Decoder {
    state: State,
    buffer: BytesMut,
    payload_max_bytes: usize,
}

impl Decoder {
    pub fn new(payload_max_bytes: usize) -> Self {
        Self {
            state: State::WaitFirst,
            buffer: BytesMut::new(),
            payload_max_bytes,
        }
    }

    /// Feeds one datagram.
    ///
    /// Malformed datagrams (see [`ProtocolError::is_malformed`]) are rejected
    /// without touching the reassembly state. Sequence errors reset the decoder.
    pub fn push(&mut self, datagram: Bytes) -> Result<Progress, ProtocolError> {
        let frame = Frame::decode(datagram)?;
        let header = frame.header;

        match self.state {
            State::WaitFirst => {
                if header.index != 1 {
                    return Err(ProtocolError::BadFirstFrame(header.index));
                }
                if header.total == 0 {
                    return Err(ProtocolError::ZeroTotal);
                }
            }
            State::Accumulating {
                message_id,
                total,
                next_index,
            } => {
                if header.message_id != message_id
                    || header.total != total
                    || header.index != next_index
                {
                    self.reset();
                    return Err(ProtocolError::SequenceMismatch {
                        expected_id: message_id,
                        expected_index: next_index,
                        expected_total: total,
                        message_id: header.message_id,
                        index: header.index,
                        total: header.total,
                    });
                }
            }
        }

        let before = self.buffer.len();
        self.buffer.extend_from_slice(&frame.payload);
        if self.buffer.len() > self.payload_max_bytes && before <= self.payload_max_bytes {
            tracing::error!(
                message_id = header.message_id,
                size = self.buffer.len(),
                max = self.payload_max_bytes,
                "reassembled payload exceeds configured ceiling"
            );
        }

        if header.index == header.total {
            self.state = State::WaitFirst;
            let payload = self.buffer.split().freeze();
            return Ok(Progress::Complete(Assembled {
                last_header: header,
                payload,
            }));
        }

        self.state = State::Accumulating {
            message_id: header.message_id,
            total: header.total,
            next_index: header.index + 1,
        };
        Ok(Progress::Incomplete)
    }

    /// Discards any partially assembled message.
    pub fn reset(&mut self) {
        self.state = State::WaitFirst;
        self.buffer.clear();
    }

    /// Returns whether no message is in progress.
    pub fn is_idle(&self) -> bool {
        self.state == State::WaitFirst
    }

    /// Returns the number of payload bytes accumulated so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn payload_max_bytes(&self) -> usize {
        self.payload_max_bytes
    }
}
