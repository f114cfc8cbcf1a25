//! Stream states and send-window bookkeeping.
//!
//! ```text
//! Inited ──init/first send──► SynSent ──ACK──► Established
//! Inited ──peer SYN─────────► SynRecv ──first send (ACK)──► Established
//! Established ──close──► Closing ──peer FIN──► Closed
//! any ──reset / peer RST / peer FIN──► Closed
//! ```

use crate::protocol::flags;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Created locally, nothing sent yet.
    Inited,
    /// SYN sent, waiting for the peer's ACK.
    SynSent,
    /// Peer sent SYN, our ACK not sent yet.
    SynRecv,
    /// Open in both directions.
    Established,
    /// We sent FIN.
    Closing,
    /// Terminal.
    Closed,
}

impl StreamState {
    /// Data and window updates may still be sent.
    #[inline]
    pub fn can_send(self) -> bool {
        !matches!(self, StreamState::Closing | StreamState::Closed)
    }
}

/// Add a signed delta to a window with wire wraparound.
///
/// The sum is taken in a wider signed type and truncated back to 32 bits,
/// so the result is always `(window + delta) mod 2^32`.
#[inline]
pub fn apply_window_delta(window: u32, delta: i32) -> u32 {
    (i64::from(window) + i64::from(delta)) as u32
}

/// Mutable part of a stream, guarded by the stream lock.
#[derive(Debug)]
pub(crate) struct StreamCore {
    pub(crate) state: StreamState,
    /// Bytes we may still send before the peer grants more.
    pub(crate) window: u32,
    /// Bytes received since the last automatic grant.
    pub(crate) recv_unacked: u32,
}

impl StreamCore {
    pub(crate) fn new(window: u32) -> Self {
        Self {
            state: StreamState::Inited,
            window,
            recv_unacked: 0,
        }
    }

    /// Flag the next outgoing frame must carry to finish the handshake
    /// lazily, advancing the state as if it had been sent.
    pub(crate) fn take_implicit_flags(&mut self) -> u16 {
        match self.state {
            StreamState::Inited => {
                self.state = StreamState::SynSent;
                flags::SYN
            }
            StreamState::SynRecv => {
                self.state = StreamState::Established;
                flags::ACK
            }
            _ => 0,
        }
    }

    /// Apply a peer WindowUpdate. Returns true when the window reopened
    /// (went from zero to nonzero).
    pub(crate) fn apply_delta(&mut self, delta: i32) -> bool {
        let was_empty = self.window == 0;
        self.window = apply_window_delta(self.window, delta);
        was_empty && self.window != 0
    }

    /// Deduct a sent chunk, modulo 2^32 like every other window change.
    pub(crate) fn consume(&mut self, len: u32) {
        self.window = self.window.wrapping_sub(len);
    }
}
