//! Stream module - one logical channel inside a session.
//!
//! A [`Stream`] is owned by its session's stream table and handed out as
//! `Arc<Stream>`. It keeps a non-owning back-reference to the session and
//! sends every frame through the session's shared frame writer.
//!
//! # Locking
//!
//! - `core` (sync mutex): state, send window, receive accounting. Held only
//!   for short critical sections, never across an `.await`.
//! - `write_gate` (async mutex): serializes senders on this stream so the
//!   window check, the send and the deduction of one chunk are not
//!   interleaved with another sender on the same stream.
//! - `window_ready` (notify): wakes tasks blocked in [`Stream::wait_writable`].

mod state;

pub use state::{apply_window_delta, StreamState};
pub(crate) use state::StreamCore;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{MuxError, Result};
use crate::hooks::{StreamEventHook, StreamHooks, Userdata};
use crate::protocol::{flags, FrameType, Header};
use crate::session::{Session, SessionInner};
use crate::transport::FrameReader;

/// One multiplexed stream.
pub struct Stream {
    id: u32,
    slot: usize,
    session: Weak<SessionInner>,
    core: Mutex<StreamCore>,
    window_ready: Notify,
    write_gate: tokio::sync::Mutex<()>,
    hooks: Mutex<StreamHooks>,
    userdata: Mutex<Option<Userdata>>,
    freed: AtomicBool,
}

impl Stream {
    pub(crate) fn new(id: u32, slot: usize, session: Weak<SessionInner>, window: u32) -> Self {
        Self {
            id,
            slot,
            session,
            core: Mutex::new(StreamCore::new(window)),
            window_ready: Notify::new(),
            write_gate: tokio::sync::Mutex::new(()),
            hooks: Mutex::new(StreamHooks::default()),
            userdata: Mutex::new(None),
            freed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.core.lock().state
    }

    /// Bytes this endpoint may currently send.
    pub fn window(&self) -> u32 {
        self.core.lock().window
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    /// The owning session, if it is still alive.
    pub fn session(&self) -> Option<Session> {
        self.session.upgrade().map(Session::from_inner)
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    // ------------------------------------------------------------------
    // Userdata and hooks
    // ------------------------------------------------------------------

    /// Typed access to the userdata attached to this stream.
    ///
    /// Returns `None` if nothing is attached or it is not a `T`.
    pub fn userdata<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = self.userdata.lock().clone()?;
        value.downcast::<T>().ok()
    }

    pub fn set_userdata<T: Any + Send + Sync>(&self, value: T) {
        self.attach_userdata(Arc::new(value));
    }

    pub(crate) fn attach_userdata(&self, value: Userdata) {
        *self.userdata.lock() = Some(value);
    }

    /// Replace every hook at once.
    pub fn set_hooks(&self, hooks: StreamHooks) {
        *self.hooks.lock() = hooks;
    }

    pub fn set_on_data<F>(&self, f: F)
    where
        F: Fn(&Stream, Bytes) + Send + Sync + 'static,
    {
        self.hooks.lock().on_data = Some(Arc::new(f));
    }

    pub fn set_on_fin<F>(&self, f: F)
    where
        F: Fn(&Stream) + Send + Sync + 'static,
    {
        self.hooks.lock().on_fin = Some(Arc::new(f));
    }

    pub fn set_on_reset<F>(&self, f: F)
    where
        F: Fn(&Stream) + Send + Sync + 'static,
    {
        self.hooks.lock().on_reset = Some(Arc::new(f));
    }

    pub fn set_on_free<F>(&self, f: F)
    where
        F: Fn(&Stream) + Send + Sync + 'static,
    {
        self.hooks.lock().on_free = Some(Arc::new(f));
    }

    // ------------------------------------------------------------------
    // Local operations
    // ------------------------------------------------------------------

    /// Open the stream explicitly: sends WindowUpdate(SYN, 0).
    ///
    /// Only valid from `Inited`. `write` and `window_update` open the stream
    /// lazily, so calling this is optional.
    pub async fn init(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let session = self.live_session()?;
        {
            let mut core = self.core.lock();
            if core.state != StreamState::Inited {
                return Err(MuxError::invalid_state(format!(
                    "init on stream {} in state {:?}",
                    self.id, core.state
                )));
            }
            core.state = StreamState::SynSent;
        }
        tracing::debug!(stream_id = self.id, "stream opening");
        session
            .send_frame(&Header::window_update(flags::SYN, self.id, 0), &[])
            .await?;
        Ok(())
    }

    /// Half-close: sends WindowUpdate(FIN, 0) and moves to `Closing`.
    ///
    /// Only valid from `Established`.
    pub async fn close(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let session = self.live_session()?;
        {
            let mut core = self.core.lock();
            if core.state != StreamState::Established {
                return Err(MuxError::invalid_state(format!(
                    "close on stream {} in state {:?}",
                    self.id, core.state
                )));
            }
            core.state = StreamState::Closing;
        }
        self.wake_waiters();
        tracing::debug!(stream_id = self.id, "stream closing");
        session
            .send_frame(&Header::window_update(flags::FIN, self.id, 0), &[])
            .await?;
        Ok(())
    }

    /// Abort: sends WindowUpdate(RST, 0) and moves to `Closed` from any state.
    pub async fn reset(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let session = self.live_session()?;
        self.core.lock().state = StreamState::Closed;
        self.wake_waiters();
        tracing::debug!(stream_id = self.id, "stream reset");
        session
            .send_frame(&Header::window_update(flags::RST, self.id, 0), &[])
            .await?;
        Ok(())
    }

    /// Send as much of `data` as the window allows.
    ///
    /// Data goes out in chunks no larger than the window (re-read before each
    /// chunk) and the session's frame payload bound. Returns the number of
    /// bytes sent, which is less than `data.len()` once the window runs out.
    /// A send failure after some bytes went out ends the call with the
    /// partial count.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let session = self.live_session()?;
        self.ensure_can_send()?;

        let max_chunk = session.config().max_frame_payload as usize;
        let mut sent = 0;

        while sent < data.len() {
            let (len, frame_flags) = {
                let mut core = self.core.lock();
                if !core.state.can_send() || core.window == 0 {
                    break;
                }
                let len = (data.len() - sent)
                    .min(core.window as usize)
                    .min(max_chunk);
                (len, core.take_implicit_flags())
            };

            let header = Header::data(frame_flags, self.id, len as u32);
            if let Err(e) = session.send_frame(&header, &data[sent..sent + len]).await {
                if sent == 0 {
                    return Err(e);
                }
                tracing::debug!(stream_id = self.id, sent, error = %e, "write cut short");
                break;
            }

            self.core.lock().consume(len as u32);
            sent += len;
        }

        tracing::trace!(stream_id = self.id, requested = data.len(), sent, "stream write");
        Ok(sent)
    }

    /// Wait until the send window is nonzero.
    ///
    /// Fails with `BrokenPipe` once the stream is closing or closed, or the
    /// session is gone.
    pub async fn wait_writable(&self) -> Result<()> {
        loop {
            // Registered before the check so a wakeup in between is not lost.
            let notified = self.window_ready.notified();
            {
                let core = self.core.lock();
                if !core.state.can_send() {
                    return Err(MuxError::BrokenPipe);
                }
                if core.window > 0 {
                    return Ok(());
                }
            }
            if self.live_session().is_err() {
                return Err(MuxError::BrokenPipe);
            }
            notified.await;
        }
    }

    /// Write all of `data`, waiting for window credit as needed.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            self.wait_writable().await?;
            offset += self.write(&data[offset..]).await?;
        }
        Ok(())
    }

    /// Grant the peer `delta` more bytes of credit on this stream.
    ///
    /// Only the peer's send window changes; the local window moves only
    /// when the peer grants credit back.
    /// Allowed while `Closing`: a half-closed stream still receives data and
    /// may need to keep the peer's window open.
    pub async fn window_update(&self, delta: i32) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let session = self.live_session()?;
        let frame_flags = {
            let mut core = self.core.lock();
            if core.state == StreamState::Closed {
                return Err(MuxError::invalid_state(format!(
                    "window update on closed stream {}",
                    self.id
                )));
            }
            core.take_implicit_flags()
        };
        session
            .send_frame(&Header::window_update(frame_flags, self.id, delta), &[])
            .await?;
        Ok(())
    }

    /// Release this stream: runs the free hook and gives the table slot back.
    ///
    /// Sends nothing; close or reset first for a clean teardown. Waiters
    /// are woken and see the stream as closed. Calling it again is a no-op.
    pub fn free(&self) {
        if self.freed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.lock().state = StreamState::Closed;
        self.wake_waiters();

        // Dropping the hooks here breaks cycles through closures that
        // captured this stream.
        let hooks = std::mem::take(&mut *self.hooks.lock());
        if let Some(on_free) = hooks.on_free {
            on_free(self);
        }

        if let Some(session) = self.session.upgrade() {
            session.release(self);
        }
        tracing::debug!(stream_id = self.id, "stream freed");
    }

    // ------------------------------------------------------------------
    // Receive path (driven by the session)
    // ------------------------------------------------------------------

    /// Handle the body of a frame addressed to this stream.
    ///
    /// Data: reads exactly `length` payload bytes and hands them to the data
    /// hook. WindowUpdate: applies the delta to the send window, waking
    /// waiters if it reopened. Returns the payload bytes consumed.
    pub(crate) async fn process(&self, header: &Header, reader: &mut FrameReader) -> Result<usize> {
        match header.frame_type {
            FrameType::Data => {
                let payload = reader.read_payload(header.length).await?;
                let len = payload.len();
                let on_data = self.hooks.lock().on_data.clone();
                if let Some(on_data) = on_data {
                    on_data(self, payload);
                }
                Ok(len)
            }
            FrameType::WindowUpdate => {
                let reopened = self.core.lock().apply_delta(header.delta());
                if reopened {
                    self.wake_waiters();
                }
                Ok(0)
            }
            other => Err(MuxError::stream_protocol(
                self.id,
                format!("unexpected {other:?} frame"),
            )),
        }
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        self.core.lock().state = state;
    }

    /// Force `Closed` after a peer RST or FIN and wake waiters.
    pub(crate) fn mark_closed(&self) {
        self.core.lock().state = StreamState::Closed;
        self.wake_waiters();
    }

    /// Peer ACK: only valid while our SYN is outstanding.
    pub(crate) fn ack_received(&self) -> Result<()> {
        let mut core = self.core.lock();
        if core.state != StreamState::SynSent {
            return Err(MuxError::stream_protocol(
                self.id,
                format!("ACK in state {:?}", core.state),
            ));
        }
        core.state = StreamState::Established;
        Ok(())
    }

    /// Count received payload bytes; returns the credit to grant back once
    /// at least `threshold` bytes are outstanding.
    pub(crate) fn record_received(&self, len: usize, threshold: u32) -> Option<i32> {
        let mut core = self.core.lock();
        if core.state == StreamState::Closed {
            return None;
        }
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        core.recv_unacked = core.recv_unacked.saturating_add(len);
        if core.recv_unacked < threshold {
            return None;
        }
        let grant = core.recv_unacked.min(i32::MAX as u32);
        core.recv_unacked -= grant;
        Some(grant as i32)
    }

    pub(crate) fn fin_hook(&self) -> Option<StreamEventHook> {
        self.hooks.lock().on_fin.clone()
    }

    pub(crate) fn reset_hook(&self) -> Option<StreamEventHook> {
        self.hooks.lock().on_reset.clone()
    }

    pub(crate) fn wake_waiters(&self) {
        self.window_ready.notify_waiters();
    }

    fn ensure_can_send(&self) -> Result<()> {
        let state = self.state();
        if state.can_send() {
            Ok(())
        } else {
            Err(MuxError::invalid_state(format!(
                "write on stream {} in state {:?}",
                self.id, state
            )))
        }
    }

    fn live_session(&self) -> Result<Arc<SessionInner>> {
        self.session
            .upgrade()
            .filter(|session| !session.is_closed())
            .ok_or(MuxError::SessionClosed)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("state", &core.state)
            .field("window", &core.window)
            .finish_non_exhaustive()
    }
}
