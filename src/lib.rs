//! # muxwire
//!
//! Stream multiplexer: many independent bidirectional streams over one
//! ordered byte-stream transport (TCP socket, Unix socket, in-memory pipe),
//! using the yamux wire format with per-stream flow-control windows.
//!
//! ## Architecture
//!
//! - **Protocol**: 12-byte big-endian frame header codec and a sans-io
//!   frame decoder
//! - **Transport**: exact-count frame reads and whole-frame vectored writes
//! - **Stream**: per-channel state machine, send window and hooks
//! - **Session**: stream table, id allocation and frame dispatch
//!
//! ## Example
//!
//! ```ignore
//! use muxwire::{GoAwayCode, Session};
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let socket = tokio::net::TcpStream::connect("127.0.0.1:4000").await?;
//!     let session = Session::builder().client(socket)?;
//!
//!     let driver = session.clone();
//!     tokio::spawn(async move { driver.run().await });
//!
//!     let stream = session.open_stream()?;
//!     stream.write_all(b"hello").await?;
//!     session.close(GoAwayCode::Normal).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod hooks;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;

pub use config::Config;
pub use error::{MuxError, Result};
pub use hooks::{SessionHooks, StreamHooks, Userdata};
pub use protocol::GoAwayCode;
pub use session::{Role, Session, SessionBuilder};
pub use stream::{Stream, StreamState};
