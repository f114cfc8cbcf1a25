//! Error types for muxwire.

use thiserror::Error;

/// Main error type for all session and stream operations.
#[derive(Debug, Error)]
pub enum MuxError {
    /// I/O error on the underlying transport (including short reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading a configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer broke the session-level protocol (bad control frame, oversized payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer sent a frame that is not valid for one stream, such as a late
    /// frame for a stream already reset here or unexpected flags.
    #[error("Protocol error on stream {stream_id}: {reason}")]
    StreamProtocol { stream_id: u32, reason: String },

    /// Operation is not valid in the current stream or session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Bad argument or configuration value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The session is closed (locally, by GoAway, or dropped).
    #[error("Session closed")]
    SessionClosed,

    /// Every slot of the stream table is in use.
    #[error("Stream table full (capacity {capacity})")]
    StreamTableFull { capacity: usize },

    /// The peer speaks a different protocol version. No GoAway can be sent.
    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u8, found: u8 },

    /// Waiting for send window ended because the stream is closing or closed.
    #[error("Broken pipe")]
    BrokenPipe,
}

impl MuxError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        MuxError::Protocol(msg.into())
    }

    pub(crate) fn stream_protocol(stream_id: u32, reason: impl Into<String>) -> Self {
        MuxError::StreamProtocol {
            stream_id,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        MuxError::InvalidState(msg.into())
    }

    /// Check if this error reports a peer protocol violation.
    #[inline]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, MuxError::Protocol(_) | MuxError::StreamProtocol { .. })
    }

    /// Check if this violation concerns a single stream only.
    ///
    /// The frame was drained and other streams are unaffected.
    #[inline]
    pub fn is_stream_error(&self) -> bool {
        matches!(self, MuxError::StreamProtocol { .. })
    }

    /// Check if the read loop cannot continue after this error.
    ///
    /// Protocol errors leave the byte stream frame-aligned, so the caller may
    /// keep reading; transport failures and version mismatches do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuxError::Io(_) | MuxError::VersionMismatch { .. } | MuxError::SessionClosed
        )
    }
}

/// Result type alias using MuxError.
pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let io = MuxError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(io.is_fatal());
        assert!(MuxError::VersionMismatch { expected: 0, found: 1 }.is_fatal());
        assert!(!MuxError::protocol("bad flags").is_fatal());
        assert!(MuxError::protocol("bad flags").is_protocol_error());
        assert!(!MuxError::BrokenPipe.is_protocol_error());

        let late = MuxError::stream_protocol(5, "unknown stream");
        assert!(late.is_protocol_error());
        assert!(late.is_stream_error());
        assert!(!late.is_fatal());
        assert!(!MuxError::protocol("bad ping").is_stream_error());
        assert_eq!(late.to_string(), "Protocol error on stream 5: unknown stream");
    }

    #[test]
    fn test_display() {
        let err = MuxError::StreamTableFull { capacity: 4 };
        assert_eq!(err.to_string(), "Stream table full (capacity 4)");

        let err = MuxError::VersionMismatch { expected: 0, found: 7 };
        assert!(err.to_string().contains("found 7"));
    }
}
