//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame: header plus, for `Data` frames,
//! the payload. Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{Frame, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::data(0, 3, 5), Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.stream_id(), 3);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{FrameType, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes, empty for every type but `Data`.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame that carries no payload.
    pub fn control(header: Header) -> Self {
        Self {
            header,
            payload: Bytes::new(),
        }
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    #[inline]
    pub fn flags(&self) -> u16 {
        self.header.flags
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    #[inline]
    pub fn length(&self) -> u32 {
        self.header.length
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
///
/// # Example
///
/// ```
/// use muxwire::protocol::{build_frame, Header, HEADER_SIZE};
///
/// let bytes = build_frame(&Header::data(0, 1, 5), b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
