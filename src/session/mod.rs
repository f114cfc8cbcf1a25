//! Session module - one multiplexed connection.
//!
//! A [`Session`] owns the transport, the stream table and the session
//! hooks. It is a cheap `Clone` handle: one task typically drives the read
//! side with [`Session::run`] (or repeated [`Session::read`] calls) while
//! other tasks open streams and write on them.
//!
//! # Dispatch
//!
//! ```text
//! read() ─► header ─┬─ stream 0 ─► Ping(SYN) → pong + on_ping
//!                   │              Ping(ACK) → on_pong(rtt)
//!                   │              GoAway    → closed + on_go_away
//!                   └─ stream n ─► known   → RST/FIN/ACK handling, then Stream::process
//!                                  unknown → SYN: new inbound stream, else protocol error
//! ```

mod builder;
mod table;

pub use builder::SessionBuilder;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::hooks::SessionHooks;
use crate::protocol::{flags, FrameType, GoAwayCode, Header, PROTOCOL_VERSION};
use crate::stream::{Stream, StreamState};
use crate::transport::{BoxedReader, BoxedWriter, FrameReader, FrameWriter};

use table::StreamTable;

/// Which end of the connection this session is. Decides id parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opens odd stream ids (1, 3, 5, ...).
    Client,
    /// Opens even stream ids (2, 4, 6, ...).
    Server,
}

impl Role {
    pub fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }
}

/// Shared session state. Streams keep a `Weak` to it.
pub(crate) struct SessionInner {
    config: Config,
    role: Role,
    reader: tokio::sync::Mutex<FrameReader>,
    writer: tokio::sync::Mutex<FrameWriter>,
    table: parking_lot::Mutex<StreamTable>,
    closed: AtomicBool,
    closed_signal: Notify,
    last_ping: parking_lot::Mutex<Option<Instant>>,
    ping_seq: AtomicU32,
    hooks: SessionHooks,
}

impl SessionInner {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send one frame unless the session is closed.
    ///
    /// Checked under the writer lock, so nothing follows the GoAway.
    pub(crate) async fn send_frame(&self, header: &Header, payload: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        writer.send(header, payload).await
    }

    /// Give a freed stream's slot back to the table.
    pub(crate) fn release(&self, stream: &Stream) {
        self.table.lock().release(stream);
    }

    fn mark_closed(&self) -> bool {
        let was_closed = self.closed.swap(true, Ordering::AcqRel);
        if !was_closed {
            self.closed_signal.notify_waiters();
            self.wake_all_streams();
        }
        was_closed
    }

    fn wake_all_streams(&self) {
        let streams = self.table.lock().streams();
        for stream in streams {
            stream.wake_waiters();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Waiters re-check and find the session gone.
        for stream in self.table.get_mut().streams() {
            stream.wake_waiters();
        }
    }
}

/// Handle to a multiplexed session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over a bidirectional transport.
    pub fn new<T>(config: Config, transport: T, role: Role) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        Self::from_split(config, Box::new(reader), Box::new(writer), role)
    }

    /// Create a session over separate read and write halves.
    pub fn from_split(
        config: Config,
        reader: BoxedReader,
        writer: BoxedWriter,
        role: Role,
    ) -> Result<Self> {
        Self::with_hooks(config, reader, writer, role, SessionHooks::default())
    }

    pub(crate) fn with_hooks(
        config: Config,
        reader: BoxedReader,
        writer: BoxedWriter,
        role: Role,
        hooks: SessionHooks,
    ) -> Result<Self> {
        config.validate()?;
        let table = StreamTable::new(config.accept_backlog, role);
        tracing::debug!(?role, backlog = config.accept_backlog, "session created");
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                role,
                reader: tokio::sync::Mutex::new(FrameReader::new(reader)),
                writer: tokio::sync::Mutex::new(FrameWriter::new(writer)),
                table: parking_lot::Mutex::new(table),
                closed: AtomicBool::new(false),
                closed_signal: Notify::new(),
                last_ping: parking_lot::Mutex::new(None),
                ping_seq: AtomicU32::new(0),
                hooks,
            }),
        })
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of streams currently holding a table slot.
    pub fn live_streams(&self) -> usize {
        self.inner.table.lock().live()
    }

    /// Look up a live, non-closed stream by id.
    pub fn stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.inner.table.lock().find(id)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(MuxError::SessionClosed)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------

    /// Send GoAway with `code` and mark the session closed.
    ///
    /// Idempotent: on a closed session this succeeds without sending.
    /// Streams and the transport are left for [`free`](Self::free).
    pub async fn close(&self, code: GoAwayCode) -> Result<()> {
        if self.inner.mark_closed() {
            return Ok(());
        }
        tracing::debug!(?code, "session closing");
        self.inner
            .writer
            .lock()
            .await
            .send(&Header::go_away(code), &[])
            .await?;
        Ok(())
    }

    /// Close (if needed), run the teardown hook and free every live stream.
    ///
    /// A failure to send the GoAway is reported after the streams are freed.
    pub async fn free(self) -> Result<()> {
        let closed = self.close(GoAwayCode::Normal).await;
        if let Err(e) = &closed {
            tracing::warn!(error = %e, "GoAway not sent during teardown");
        }

        if let Some(on_teardown) = self.inner.hooks.on_teardown.clone() {
            on_teardown(&self);
        }

        let streams = self.inner.table.lock().streams();
        for stream in streams {
            stream.free();
        }
        tracing::debug!("session freed");
        closed
    }

    /// Send a ping request (`is_pong == false`) or a pong reply.
    ///
    /// A request also records the send time for the round-trip measurement.
    pub async fn ping(&self, value: u32, is_pong: bool) -> Result<()> {
        self.ensure_open()?;
        let frame_flags = if is_pong { flags::ACK } else { flags::SYN };
        if !is_pong {
            *self.inner.last_ping.lock() = Some(Instant::now());
        }
        self.inner
            .send_frame(&Header::ping(frame_flags, value), &[])
            .await?;
        Ok(())
    }

    /// Spawn a task that sends a ping every `keepalive_interval`.
    ///
    /// The task stops once the session is closed or every handle is dropped.
    pub fn spawn_keepalive(&self) -> Result<JoinHandle<()>> {
        let period = self.inner.config.keepalive_interval();
        if period.is_zero() {
            return Err(MuxError::InvalidArgument(
                "keepalive interval must be nonzero".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| MuxError::invalid_state("keepalive requires a tokio runtime"))?;

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let session = Session::from_inner(inner);
                if session.is_closed() {
                    break;
                }
                let value = session.inner.ping_seq.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = session.ping(value, false).await {
                    tracing::debug!(error = %e, "keepalive stopped");
                    break;
                }
                tracing::trace!(value, "keepalive ping");
            }
        }))
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Create a stream in `Inited` with the full configured window.
    ///
    /// `id == 0` allocates the next id for this session's role. Fails with
    /// `StreamTableFull` when every slot is taken, leaving the table as it
    /// was.
    pub fn new_stream(&self, id: u32) -> Result<Arc<Stream>> {
        let mut table = self.inner.table.lock();

        let stream_id = if id == 0 {
            table
                .peek_next_id()
                .ok_or_else(|| MuxError::invalid_state("stream ids exhausted"))?
        } else {
            if table.find(id).is_some() {
                return Err(MuxError::InvalidArgument(format!(
                    "stream {id} is already open"
                )));
            }
            id
        };

        let slot = table.claim_slot().ok_or(MuxError::StreamTableFull {
            capacity: table.capacity(),
        })?;
        if id == 0 {
            table.advance_next_id();
        }

        let stream = Arc::new(Stream::new(
            stream_id,
            slot,
            Arc::downgrade(&self.inner),
            self.inner.config.max_stream_window_size,
        ));
        table.insert(stream.clone());
        tracing::debug!(stream_id, slot, "stream created");
        Ok(stream)
    }

    /// Create a stream with the next self-allocated id.
    pub fn open_stream(&self) -> Result<Arc<Stream>> {
        self.new_stream(0)
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Read and dispatch exactly one frame.
    ///
    /// Returns the number of payload bytes consumed. Protocol errors leave
    /// the transport frame-aligned; I/O errors and version mismatches do not.
    pub async fn read(&self) -> Result<usize> {
        self.ensure_open()?;
        let mut reader = self.inner.reader.lock().await;
        let header = reader.read_header().await?;

        if header.version != PROTOCOL_VERSION {
            tracing::error!(found = header.version, "protocol version mismatch");
            return Err(MuxError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: header.version,
            });
        }
        tracing::trace!(
            stream_id = header.stream_id,
            frame_type = ?header.frame_type,
            flags = header.flags,
            length = header.length,
            "frame received"
        );

        if header.is_session() {
            self.handle_control(&header, &mut reader).await
        } else {
            self.handle_stream_frame(&header, &mut reader).await
        }
    }

    /// Drive [`read`](Self::read) until the session closes.
    ///
    /// Returns `Ok(())` after a local close or the peer's GoAway. A
    /// session-level protocol violation is answered with
    /// GoAway(ProtocolError) and returned. Errors that affect a single stream
    /// (a late frame for a stream reset here, bad flags, a full table) are
    /// logged and the loop continues.
    pub async fn run(&self) -> Result<()> {
        loop {
            let closed = self.inner.closed_signal.notified();
            if self.is_closed() {
                return Ok(());
            }

            let result = tokio::select! {
                biased;
                _ = closed => return Ok(()),
                result = self.read() => result,
            };

            match result {
                Ok(_) => {}
                Err(MuxError::SessionClosed) => return Ok(()),
                Err(e) if e.is_stream_error() => {
                    tracing::warn!(error = %e, "stream frame dropped");
                }
                Err(e) if e.is_protocol_error() => {
                    tracing::warn!(error = %e, "protocol violation from peer");
                    if let Err(close_err) = self.close(GoAwayCode::ProtocolError).await {
                        tracing::debug!(error = %close_err, "GoAway not sent");
                    }
                    return Err(e);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "read loop terminated");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "frame rejected");
                }
            }
        }
    }

    async fn handle_control(&self, header: &Header, reader: &mut FrameReader) -> Result<usize> {
        match header.frame_type {
            FrameType::Ping if header.is_syn() => {
                self.ping(header.length, true).await?;
                if let Some(on_ping) = self.inner.hooks.on_ping.clone() {
                    on_ping(self, header.length);
                }
                Ok(0)
            }
            FrameType::Ping if header.is_ack() => {
                let Some(on_pong) = self.inner.hooks.on_pong.clone() else {
                    return Err(MuxError::protocol("pong received with no pong hook"));
                };
                let sent = *self.inner.last_ping.lock();
                let rtt = sent.map(|at| at.elapsed()).unwrap_or_default();
                on_pong(self, header.length, rtt);
                Ok(0)
            }
            FrameType::GoAway => {
                let code = GoAwayCode::from(header.length);
                tracing::debug!(?code, "peer going away");
                self.inner.mark_closed();
                if let Some(on_go_away) = self.inner.hooks.on_go_away.clone() {
                    on_go_away(self, code);
                }
                Ok(0)
            }
            FrameType::Data => {
                reader.discard(header.length).await?;
                Err(MuxError::protocol("data frame on the session stream"))
            }
            other => Err(MuxError::protocol(format!(
                "{:?} frame with flags {:#x} on the session stream",
                other, header.flags
            ))),
        }
    }

    async fn handle_stream_frame(
        &self,
        header: &Header,
        reader: &mut FrameReader,
    ) -> Result<usize> {
        let id = header.stream_id;

        if header.frame_type == FrameType::Data && header.length > self.inner.config.max_frame_payload
        {
            reader.discard(header.length).await?;
            return Err(MuxError::protocol(format!(
                "data frame of {} bytes on stream {} exceeds {}",
                header.length, id, self.inner.config.max_frame_payload
            )));
        }

        let found = self.inner.table.lock().find(id);
        let stream = match found {
            Some(stream) => {
                if let Err(e) = self.apply_flags(&stream, header).await {
                    reader.discard(header.payload_len()).await?;
                    return Err(e);
                }
                stream
            }
            None if header.is_syn() => match self.accept_stream(header, reader).await? {
                Some(stream) => stream,
                None => return Ok(0),
            },
            None => {
                reader.discard(header.payload_len()).await?;
                return Err(MuxError::stream_protocol(
                    id,
                    format!("{:?} frame for unknown stream", header.frame_type),
                ));
            }
        };

        let consumed = stream.process(header, reader).await?;
        if consumed > 0 && self.inner.config.auto_window_update {
            self.grant_credit(&stream, consumed).await?;
        }
        Ok(consumed)
    }

    /// Generic RST / FIN / ACK handling for a known stream.
    async fn apply_flags(&self, stream: &Stream, header: &Header) -> Result<()> {
        if header.is_rst() {
            tracing::debug!(stream_id = stream.id(), "stream reset by peer");
            stream.mark_closed();
            if let Some(on_reset) = stream.reset_hook() {
                on_reset(stream);
            }
        } else if header.is_fin() {
            tracing::debug!(stream_id = stream.id(), "stream closed by peer");
            if stream.state() != StreamState::Closing {
                match stream.close().await {
                    Ok(()) | Err(MuxError::InvalidState(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            stream.mark_closed();
            if let Some(on_fin) = stream.fin_hook() {
                on_fin(stream);
            }
        } else if header.is_ack() {
            stream.ack_received()?;
        } else if header.flags != 0 {
            return Err(MuxError::stream_protocol(
                stream.id(),
                format!("flags {:#x} on an open stream", header.flags),
            ));
        }
        Ok(())
    }

    /// Set up a stream the peer opened with SYN.
    ///
    /// Returns `None` if it was refused because the table is full; the peer
    /// gets an RST and the error is reported after the payload is drained.
    async fn accept_stream(
        &self,
        header: &Header,
        reader: &mut FrameReader,
    ) -> Result<Option<Arc<Stream>>> {
        let id = header.stream_id;
        let userdata = self
            .inner
            .hooks
            .userdata_provider
            .clone()
            .and_then(|provider| provider(self, id));

        let stream = match self.new_stream(id) {
            Ok(stream) => stream,
            Err(e) => {
                reader.discard(header.payload_len()).await?;
                if let MuxError::StreamTableFull { .. } = e {
                    tracing::warn!(stream_id = id, "refusing inbound stream, table full");
                    self.inner
                        .send_frame(&Header::window_update(flags::RST, id, 0), &[])
                        .await?;
                }
                return Err(e);
            }
        };

        if let Some(userdata) = userdata {
            stream.attach_userdata(userdata);
        }
        stream.set_state(StreamState::SynRecv);
        tracing::debug!(stream_id = id, "inbound stream");
        if let Some(on_new_stream) = self.inner.hooks.on_new_stream.clone() {
            on_new_stream(self, &stream);
        }
        Ok(Some(stream))
    }

    async fn grant_credit(&self, stream: &Stream, consumed: usize) -> Result<()> {
        let threshold = (self.inner.config.max_stream_window_size / 2).max(1);
        let Some(grant) = stream.record_received(consumed, threshold) else {
            return Ok(());
        };
        match stream.window_update(grant).await {
            Ok(()) => {
                tracing::trace!(stream_id = stream.id(), grant, "window granted");
                Ok(())
            }
            Err(MuxError::InvalidState(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.table.lock();
        f.debug_struct("Session")
            .field("role", &self.inner.role)
            .field("closed", &self.is_closed())
            .field("live_streams", &table.live())
            .field("high_water", &table.high_water())
            .finish()
    }
}
