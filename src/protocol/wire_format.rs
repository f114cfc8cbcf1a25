//! Wire format encoding and decoding.
//!
//! Implements the 12-byte header format:
//! ```text
//! ┌─────────┬───────┬──────────┬───────────┬──────────┐
//! │ Version │ Type  │ Flags    │ Stream ID │ Length   │
//! │ 1 byte  │ 1 byte│ uint16 BE│ uint32 BE │ uint32 BE│
//! └─────────┴───────┴──────────┴───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Only `Data` frames carry a payload,
//! and it is exactly `length` bytes. For the other types `length` is a value:
//! a signed window delta, an opaque ping value, or a GoAway error code.

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// The only protocol version this engine speaks.
pub const PROTOCOL_VERSION: u8 = 0;

/// Stream ID reserved for session-level control frames.
pub const SESSION_STREAM_ID: u32 = 0;

/// Default per-stream send window (256 KiB).
pub const DEFAULT_STREAM_WINDOW: u32 = 256 * 1024;

/// Default maximum number of concurrently live streams per session.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 256;

/// Default upper bound on a single Data frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Flag constants for the protocol.
pub mod flags {
    /// Opens a new stream.
    pub const SYN: u16 = 0x0001;
    /// Acknowledges a stream open (or answers a ping).
    pub const ACK: u16 = 0x0002;
    /// Half-closes a stream.
    pub const FIN: u16 = 0x0004;
    /// Resets a stream immediately.
    pub const RST: u16 = 0x0008;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u16, flag: u16) -> bool {
        flags & flag != 0
    }
}

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Stream payload follows the header.
    Data,
    /// Window credit delta (signed), may carry stream flags.
    WindowUpdate,
    /// Keepalive / round-trip measurement.
    Ping,
    /// Session termination with an error code.
    GoAway,
    /// Any type byte this engine does not know. Kept so decoding is total.
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0 => FrameType::Data,
            1 => FrameType::WindowUpdate,
            2 => FrameType::Ping,
            3 => FrameType::GoAway,
            other => FrameType::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(value: FrameType) -> Self {
        match value {
            FrameType::Data => 0,
            FrameType::WindowUpdate => 1,
            FrameType::Ping => 2,
            FrameType::GoAway => 3,
            FrameType::Unknown(other) => other,
        }
    }
}

/// Error code carried by a GoAway frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoAwayCode {
    /// Normal termination.
    Normal,
    /// The sender observed a protocol violation.
    ProtocolError,
    /// The sender hit an internal failure.
    InternalError,
    /// Code outside the known set.
    Other(u32),
}

impl From<u32> for GoAwayCode {
    fn from(value: u32) -> Self {
        match value {
            0 => GoAwayCode::Normal,
            1 => GoAwayCode::ProtocolError,
            2 => GoAwayCode::InternalError,
            other => GoAwayCode::Other(other),
        }
    }
}

impl From<GoAwayCode> for u32 {
    fn from(value: GoAwayCode) -> Self {
        match value {
            GoAwayCode::Normal => 0,
            GoAwayCode::ProtocolError => 1,
            GoAwayCode::InternalError => 2,
            GoAwayCode::Other(other) => other,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version (must be `PROTOCOL_VERSION`).
    pub version: u8,
    /// Frame type.
    pub frame_type: FrameType,
    /// Flags (see `flags` module).
    pub flags: u16,
    /// Target stream, 0 for session control.
    pub stream_id: u32,
    /// Payload length, window delta, ping value or error code depending on type.
    pub length: u32,
}

impl Header {
    /// Create a new header with the current protocol version.
    pub fn new(frame_type: FrameType, flags: u16, stream_id: u32, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            frame_type,
            flags,
            stream_id,
            length,
        }
    }

    /// Data frame header announcing `len` payload bytes.
    pub fn data(flags: u16, stream_id: u32, len: u32) -> Self {
        Self::new(FrameType::Data, flags, stream_id, len)
    }

    /// WindowUpdate header carrying a signed credit delta.
    pub fn window_update(flags: u16, stream_id: u32, delta: i32) -> Self {
        Self::new(FrameType::WindowUpdate, flags, stream_id, delta as u32)
    }

    /// Ping header (SYN for a request, ACK for a reply).
    pub fn ping(flags: u16, value: u32) -> Self {
        Self::new(FrameType::Ping, flags, SESSION_STREAM_ID, value)
    }

    /// GoAway header.
    pub fn go_away(code: GoAwayCode) -> Self {
        Self::new(FrameType::GoAway, 0, SESSION_STREAM_ID, code.into())
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::{flags, Header};
    ///
    /// let header = Header::window_update(flags::SYN, 1, 0);
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [0, 1, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.version;
        buf[1] = self.frame_type.into();
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Decode a header from exactly one header's worth of bytes.
    ///
    /// Total over every possible byte pattern; validation is the
    /// dispatcher's job.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            version: buf[0],
            frame_type: FrameType::from(buf[1]),
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            stream_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }

    /// Decode a header from the front of a slice.
    ///
    /// Returns `None` if the slice is too short.
    pub fn decode_from(buf: &[u8]) -> Option<Self> {
        let head: &[u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self::decode(head))
    }

    /// Number of payload bytes that follow this header on the wire.
    #[inline]
    pub fn payload_len(&self) -> u32 {
        match self.frame_type {
            FrameType::Data => self.length,
            _ => 0,
        }
    }

    /// The `length` field read as a signed window delta.
    #[inline]
    pub fn delta(&self) -> i32 {
        self.length as i32
    }

    /// Check if this header targets the session rather than a stream.
    #[inline]
    pub fn is_session(&self) -> bool {
        self.stream_id == SESSION_STREAM_ID
    }

    #[inline]
    pub fn is_syn(&self) -> bool {
        flags::has_flag(self.flags, flags::SYN)
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        flags::has_flag(self.flags, flags::ACK)
    }

    #[inline]
    pub fn is_fin(&self) -> bool {
        flags::has_flag(self.flags, flags::FIN)
    }

    #[inline]
    pub fn is_rst(&self) -> bool {
        flags::has_flag(self.flags, flags::RST)
    }
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> Header {
    Header::decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::data(flags::ACK, 7, 1024);
        let decoded = Header::decode(&original.encode());
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_roundtrip_extremes() {
        for frame_type in [0u8, 1, 2, 3, 4, 0xFF] {
            for flag_bits in [0u16, flags::SYN, flags::RST | flags::FIN, u16::MAX] {
                for value in [0u32, 1, 0x8000_0000, u32::MAX] {
                    let header = Header {
                        version: 0xAB,
                        frame_type: FrameType::from(frame_type),
                        flags: flag_bits,
                        stream_id: value.rotate_left(7),
                        length: value,
                    };
                    assert_eq!(Header::decode(&header.encode()), header);
                }
            }
        }
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header {
            version: 0x01,
            frame_type: FrameType::from(0x02),
            flags: 0x0304,
            stream_id: 0x05060708,
            length: 0x090A0B0C,
        };
        let bytes = header.encode();

        assert_eq!(
            bytes,
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C]
        );
    }

    #[test]
    fn test_header_size_is_exactly_12() {
        assert_eq!(HEADER_SIZE, 12);
        assert_eq!(Header::ping(flags::SYN, 1).encode().len(), 12);
    }

    #[test]
    fn test_decode_from_too_short() {
        let buf = [0u8; 11];
        assert!(Header::decode_from(&buf).is_none());
        assert!(Header::decode_from(&[0u8; 20]).is_some());
    }

    #[test]
    fn test_window_delta_is_twos_complement() {
        let header = Header::window_update(0, 3, -100);
        assert_eq!(header.length, (-100i32) as u32);
        assert_eq!(header.delta(), -100);

        let decoded = Header::decode(&header.encode());
        assert_eq!(decoded.delta(), -100);
    }

    #[test]
    fn test_payload_len_only_for_data() {
        assert_eq!(Header::data(0, 1, 10).payload_len(), 10);
        assert_eq!(Header::window_update(0, 1, 10).payload_len(), 0);
        assert_eq!(Header::ping(flags::SYN, 10).payload_len(), 0);
        assert_eq!(Header::go_away(GoAwayCode::Other(10)).payload_len(), 0);
    }

    #[test]
    fn test_frame_type_conversions() {
        assert_eq!(FrameType::from(0), FrameType::Data);
        assert_eq!(FrameType::from(3), FrameType::GoAway);
        assert_eq!(FrameType::from(9), FrameType::Unknown(9));
        assert_eq!(u8::from(FrameType::WindowUpdate), 1);
        assert_eq!(u8::from(FrameType::Unknown(200)), 200);
    }

    #[test]
    fn test_go_away_codes() {
        assert_eq!(GoAwayCode::from(0), GoAwayCode::Normal);
        assert_eq!(GoAwayCode::from(1), GoAwayCode::ProtocolError);
        assert_eq!(GoAwayCode::from(2), GoAwayCode::InternalError);
        assert_eq!(GoAwayCode::from(42), GoAwayCode::Other(42));
        assert_eq!(u32::from(GoAwayCode::InternalError), 2);

        let header = Header::go_away(GoAwayCode::ProtocolError);
        assert!(header.is_session());
        assert_eq!(header.length, 1);
    }

    #[test]
    fn test_flag_accessors() {
        let header = Header::window_update(flags::SYN | flags::ACK, 1, 0);
        assert!(header.is_syn());
        assert!(header.is_ack());
        assert!(!header.is_fin());
        assert!(!header.is_rst());
        assert!(flags::has_flag(flags::RST | flags::FIN, flags::FIN));
    }

    #[test]
    fn test_standalone_functions() {
        let header = Header::ping(flags::ACK, 42);
        let encoded = encode_header(&header);
        assert_eq!(decode_header(&encoded), header);
    }
}
