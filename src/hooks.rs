//! Application hooks for sessions and streams.
//!
//! Every slot is optional. Closures are stored as `Arc<dyn Fn>` so the
//! engine can clone a hook out of its slot and call it with no lock held;
//! a hook may therefore call back into the stream or session (set other
//! hooks, spawn a task that writes, reset the stream, ...).
//!
//! # Example
//!
//! ```ignore
//! use muxwire::{Session, SessionHooks};
//!
//! let hooks = SessionHooks::new()
//!     .on_new_stream(|_session, stream| {
//!         stream.set_on_data(|stream, data| {
//!             tracing::info!(id = stream.id(), len = data.len(), "data");
//!         });
//!     })
//!     .on_go_away(|_session, code| tracing::info!(?code, "peer going away"));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::protocol::GoAwayCode;
use crate::session::Session;
use crate::stream::Stream;

/// Opaque per-stream application value.
pub type Userdata = Arc<dyn Any + Send + Sync>;

pub type PingHook = Arc<dyn Fn(&Session, u32) + Send + Sync>;
pub type PongHook = Arc<dyn Fn(&Session, u32, Duration) + Send + Sync>;
pub type GoAwayHook = Arc<dyn Fn(&Session, GoAwayCode) + Send + Sync>;
pub type NewStreamHook = Arc<dyn Fn(&Session, &Arc<Stream>) + Send + Sync>;
pub type UserdataProvider = Arc<dyn Fn(&Session, u32) -> Option<Userdata> + Send + Sync>;
pub type TeardownHook = Arc<dyn Fn(&Session) + Send + Sync>;

pub type DataHook = Arc<dyn Fn(&Stream, Bytes) + Send + Sync>;
pub type StreamEventHook = Arc<dyn Fn(&Stream) + Send + Sync>;

/// Session-level hooks.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub(crate) on_ping: Option<PingHook>,
    pub(crate) on_pong: Option<PongHook>,
    pub(crate) on_go_away: Option<GoAwayHook>,
    pub(crate) on_new_stream: Option<NewStreamHook>,
    pub(crate) userdata_provider: Option<UserdataProvider>,
    pub(crate) on_teardown: Option<TeardownHook>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after the pong for a peer's ping request has been sent.
    pub fn on_ping<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u32) + Send + Sync + 'static,
    {
        self.on_ping = Some(Arc::new(f));
        self
    }

    /// Called with the echoed value and round-trip time when a pong arrives.
    ///
    /// A pong received while this slot is empty is a protocol error.
    pub fn on_pong<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u32, Duration) + Send + Sync + 'static,
    {
        self.on_pong = Some(Arc::new(f));
        self
    }

    pub fn on_go_away<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, GoAwayCode) + Send + Sync + 'static,
    {
        self.on_go_away = Some(Arc::new(f));
        self
    }

    /// Called for every stream the peer opens, before its first frame is processed.
    pub fn on_new_stream<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &Arc<Stream>) + Send + Sync + 'static,
    {
        self.on_new_stream = Some(Arc::new(f));
        self
    }

    /// Supplies the userdata attached to peer-opened streams, by stream id.
    pub fn userdata_provider<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u32) -> Option<Userdata> + Send + Sync + 'static,
    {
        self.userdata_provider = Some(Arc::new(f));
        self
    }

    /// Called once by `Session::free`, before the streams are released.
    pub fn on_teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.on_teardown = Some(Arc::new(f));
        self
    }

    pub(crate) fn has_pong(&self) -> bool {
        self.on_pong.is_some()
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("on_ping", &self.on_ping.is_some())
            .field("on_pong", &self.on_pong.is_some())
            .field("on_go_away", &self.on_go_away.is_some())
            .field("on_new_stream", &self.on_new_stream.is_some())
            .field("userdata_provider", &self.userdata_provider.is_some())
            .field("on_teardown", &self.on_teardown.is_some())
            .finish()
    }
}

/// Stream-level hooks.
#[derive(Clone, Default)]
pub struct StreamHooks {
    pub(crate) on_data: Option<DataHook>,
    pub(crate) on_fin: Option<StreamEventHook>,
    pub(crate) on_reset: Option<StreamEventHook>,
    pub(crate) on_free: Option<StreamEventHook>,
}

impl StreamHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with each Data payload. The buffer is only lent to the hook;
    /// clone the `Bytes` to keep it.
    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stream, Bytes) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(f));
        self
    }

    /// Called when the peer closes the stream with FIN.
    pub fn on_fin<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stream) + Send + Sync + 'static,
    {
        self.on_fin = Some(Arc::new(f));
        self
    }

    /// Called when the peer resets the stream with RST.
    pub fn on_reset<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stream) + Send + Sync + 'static,
    {
        self.on_reset = Some(Arc::new(f));
        self
    }

    /// Called once when the stream is freed.
    pub fn on_free<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stream) + Send + Sync + 'static,
    {
        self.on_free = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for StreamHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHooks")
            .field("on_data", &self.on_data.is_some())
            .field("on_fin", &self.on_fin.is_some())
            .field("on_reset", &self.on_reset.is_some())
            .field("on_free", &self.on_free.is_some())
            .finish()
    }
}
