//! Transport module - frame I/O over any ordered byte stream.
//!
//! The session takes any `AsyncRead + AsyncWrite` transport (TCP socket,
//! Unix socket, in-memory duplex) and splits it into:
//! - [`FrameReader`]: exact-count header and payload reads
//! - [`FrameWriter`]: whole-frame vectored writes

mod reader;
mod writer;

pub use reader::{BoxedReader, FrameReader};
pub use writer::{BoxedWriter, FrameWriter};
