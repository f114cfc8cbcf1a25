//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the yamux frame layer:
//! - 12-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_header, encode_header, flags, FrameType, GoAwayCode, Header, DEFAULT_ACCEPT_BACKLOG,
    DEFAULT_MAX_FRAME_PAYLOAD, DEFAULT_STREAM_WINDOW, HEADER_SIZE, PROTOCOL_VERSION,
    SESSION_STREAM_ID,
};
