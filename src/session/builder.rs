//! Session builder.
//!
//! # Example
//!
//! ```ignore
//! use muxwire::{GoAwayCode, Session};
//!
//! let socket = tokio::net::TcpStream::connect("127.0.0.1:4000").await?;
//! let session = Session::builder()
//!     .accept_backlog(64)
//!     .keepalive(std::time::Duration::from_secs(10))
//!     .on_go_away(|_, code| tracing::info!(?code, "server left"))
//!     .client(socket)?;
//!
//! let stream = session.open_stream()?;
//! stream.write_all(b"hello").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::error::Result;
use crate::hooks::{SessionHooks, Userdata};
use crate::protocol::GoAwayCode;
use crate::stream::Stream;
use crate::transport::{BoxedReader, BoxedWriter};

use super::{Role, Session};

/// Fluent configuration for a [`Session`].
///
/// Collects config values and session hooks, then builds the session with
/// one of the terminal methods. When keepalive is enabled the keepalive
/// task is spawned on the current tokio runtime.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: Config,
    hooks: SessionHooks,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Maximum number of concurrently live streams.
    ///
    /// Default: 256
    pub fn accept_backlog(mut self, backlog: usize) -> Self {
        self.config.accept_backlog = backlog;
        self
    }

    /// Initial send window of every stream.
    ///
    /// Default: 256 KiB
    pub fn max_stream_window_size(mut self, size: u32) -> Self {
        self.config.max_stream_window_size = size;
        self
    }

    /// Largest Data payload accepted from the peer.
    ///
    /// Default: 16 MiB
    pub fn max_frame_payload(mut self, size: u32) -> Self {
        self.config.max_frame_payload = size;
        self
    }

    /// Enable keepalive pings every `interval`.
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.config.enable_keepalive = true;
        self.config.keepalive_interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Grant credit back to the peer automatically as data is received.
    pub fn auto_window_update(mut self, enabled: bool) -> Self {
        self.config.auto_window_update = enabled;
        self
    }

    /// Replace all session hooks at once.
    pub fn hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_ping<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u32) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_ping(f);
        self
    }

    pub fn on_pong<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u32, Duration) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_pong(f);
        self
    }

    pub fn on_go_away<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, GoAwayCode) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_go_away(f);
        self
    }

    pub fn on_new_stream<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &Arc<Stream>) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_new_stream(f);
        self
    }

    pub fn userdata_provider<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u32) -> Option<Userdata> + Send + Sync + 'static,
    {
        self.hooks = self.hooks.userdata_provider(f);
        self
    }

    pub fn on_teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_teardown(f);
        self
    }

    /// Build the client end (odd stream ids).
    pub fn client<T>(self, transport: T) -> Result<Session>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.build(transport, Role::Client)
    }

    /// Build the server end (even stream ids).
    pub fn server<T>(self, transport: T) -> Result<Session>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.build(transport, Role::Server)
    }

    pub fn build<T>(self, transport: T, role: Role) -> Result<Session>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        self.build_split(Box::new(reader), Box::new(writer), role)
    }

    /// Build over separate read and write halves.
    ///
    /// This will:
    /// 1. Validate the configuration
    /// 2. Install a logging pong hook if keepalive is on and none was given
    /// 3. Create the session
    /// 4. Spawn the keepalive task if enabled
    pub fn build_split(self, reader: BoxedReader, writer: BoxedWriter, role: Role) -> Result<Session> {
        self.config.validate()?;

        let mut hooks = self.hooks;
        if self.config.enable_keepalive && !hooks.has_pong() {
            hooks = hooks.on_pong(|_, value, rtt| {
                tracing::debug!(value, rtt_us = rtt.as_micros() as u64, "keepalive pong");
            });
        }

        let session = Session::with_hooks(self.config, reader, writer, role, hooks)?;
        if session.config().enable_keepalive {
            session.spawn_keepalive()?;
        }
        Ok(session)
    }
}
