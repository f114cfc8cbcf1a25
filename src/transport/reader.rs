//! Frame reader: exact-count reads from the read half of a transport.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::protocol::{Header, HEADER_SIZE};

/// Boxed read half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Size of the scratch buffer used to discard unwanted payloads.
const DISCARD_CHUNK: usize = 8 * 1024;

/// Reads headers and payloads with exact byte counts.
///
/// A transport that ends in the middle of a frame yields an
/// `UnexpectedEof` I/O error.
pub struct FrameReader {
    inner: BoxedReader,
}

impl FrameReader {
    pub fn new(inner: BoxedReader) -> Self {
        Self { inner }
    }

    /// Read and decode exactly one header.
    pub async fn read_header(&mut self) -> Result<Header> {
        let mut buf = [0u8; HEADER_SIZE];
        self.inner.read_exact(&mut buf).await?;
        Ok(Header::decode(&buf))
    }

    /// Read exactly `len` payload bytes.
    pub async fn read_payload(&mut self, len: u32) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(len as usize);
        self.inner.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }

    /// Read and drop `len` bytes, keeping the stream frame-aligned.
    pub async fn discard(&mut self, len: u32) -> Result<()> {
        let mut remaining = len as usize;
        let mut scratch = [0u8; DISCARD_CHUNK];
        while remaining > 0 {
            let n = remaining.min(DISCARD_CHUNK);
            self.inner.read_exact(&mut scratch[..n]).await?;
            remaining -= n;
        }
        Ok(())
    }
}
