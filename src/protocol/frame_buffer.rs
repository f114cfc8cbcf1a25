//! Frame buffer for accumulating partial reads.
//!
//! A sans-io decoder for transports that hand over arbitrary byte chunks.
//! Uses `bytes::BytesMut` and a two-state machine:
//! - `WaitingForHeader`: need 12 bytes
//! - `WaitingForPayload`: Data header parsed, need N more payload bytes
//!
//! Only `Data` frames consume payload bytes; for every other type the
//! `length` field is a value and the frame is complete after its header.

use bytes::{Bytes, BytesMut};

use super::wire_format::{FrameType, Header, DEFAULT_MAX_FRAME_PAYLOAD, HEADER_SIZE};
use super::Frame;
use crate::error::{MuxError, Result};

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForPayload { header: Header, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_payload: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default payload bound.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_FRAME_PAYLOAD)
    }

    /// Create a new frame buffer with a custom payload bound.
    pub fn with_max_payload(max_payload: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a Data frame announces more than the
    /// payload bound. The buffer should be discarded after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                let Some(header) = Header::decode_from(&self.buffer) else {
                    return Ok(None);
                };

                if header.frame_type == FrameType::Data && header.length > self.max_payload {
                    return Err(MuxError::protocol(format!(
                        "Payload size {} exceeds maximum {}",
                        header.length, self.max_payload
                    )));
                }

                let _ = self.buffer.split_to(HEADER_SIZE);

                let remaining = header.payload_len();
                if remaining == 0 {
                    return Ok(Some(Frame::control(header)));
                }

                self.state = State::WaitingForPayload { header, remaining };
                self.try_extract_one()
            }

            State::WaitingForPayload { header, remaining } => {
                let remaining = *remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload: Bytes = self.buffer.split_to(remaining).freeze();
                let header = *header;
                self.state = State::WaitingForHeader;

                Ok(Some(Frame::new(header, payload)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
