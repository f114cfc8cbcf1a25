//! Frame writer: one header + payload per send, never interleaved.
//!
//! Every stream of a session writes through the same transport. The
//! [`FrameWriter`] sits behind an async mutex in the session, so a send holds
//! the transport for exactly one frame: header and payload go out with
//! vectored writes, partial writes are continued, then the transport is
//! flushed.
//!
//! ```text
//! Stream 1 ─┐
//! Stream 3 ─┼─► Mutex<FrameWriter> ─► transport
//! Session  ─┘
//! ```

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{MuxError, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Boxed write half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes whole frames to the write half of a transport.
pub struct FrameWriter {
    inner: BoxedWriter,
    frames_sent: u64,
}

impl FrameWriter {
    pub fn new(inner: BoxedWriter) -> Self {
        Self {
            inner,
            frames_sent: 0,
        }
    }

    /// Send one frame. Returns the number of bytes written (header + payload).
    pub async fn send(&mut self, header: &Header, payload: &[u8]) -> Result<usize> {
        let encoded = header.encode();
        let written = write_frame(&mut self.inner, &encoded, payload).await?;
        self.frames_sent += 1;
        tracing::trace!(
            stream_id = header.stream_id,
            frame_type = ?header.frame_type,
            flags = header.flags,
            bytes = written,
            "frame sent"
        );
        Ok(written)
    }

    /// Number of frames written so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

/// Write a header and its payload with scatter/gather I/O (write_vectored).
async fn write_frame<W>(writer: &mut W, header: &[u8; HEADER_SIZE], payload: &[u8]) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let total_size = HEADER_SIZE + payload.len();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(header, payload, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(MuxError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(total_written)
}

/// Build IoSlice array for the data not yet written.
fn remaining_slices<'a>(
    header: &'a [u8; HEADER_SIZE],
    payload: &'a [u8],
    skip_bytes: usize,
) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);

    if skip_bytes < HEADER_SIZE {
        slices.push(IoSlice::new(&header[skip_bytes..]));
    }

    let start_in_payload = skip_bytes.saturating_sub(HEADER_SIZE);
    if start_in_payload < payload.len() {
        slices.push(IoSlice::new(&payload[start_in_payload..]));
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{flags, FrameBuffer};
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts at most `chunk` bytes per write call.
    struct Trickle {
        out: Vec<u8>,
        chunk: usize,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_remaining_slices_no_skip() {
        let header = [0u8; HEADER_SIZE];
        let slices = remaining_slices(&header, b"hello", 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_remaining_slices_partial_header() {
        let header = [0u8; HEADER_SIZE];
        let slices = remaining_slices(&header, b"hello", 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_remaining_slices_inside_payload() {
        let header = [0u8; HEADER_SIZE];
        let slices = remaining_slices(&header, b"hello", HEADER_SIZE + 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"llo");
    }

    #[test]
    fn test_remaining_slices_header_only_frame() {
        let header = [0u8; HEADER_SIZE];
        assert_eq!(remaining_slices(&header, &[], 0).len(), 1);
        assert!(remaining_slices(&header, &[], HEADER_SIZE).is_empty());
    }

    #[tokio::test]
    async fn test_send_writes_header_and_payload() {
        let mut writer = FrameWriter::new(Box::new(Cursor::new(Vec::new())));
        let written = writer
            .send(&Header::data(flags::SYN, 1, 5), b"hello")
            .await
            .unwrap();

        assert_eq!(written, HEADER_SIZE + 5);
        assert_eq!(writer.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_partial_writes_are_continued() {
        let mut sink = Trickle {
            out: Vec::new(),
            chunk: 3,
        };
        let header = Header::data(0, 7, 10).encode();
        let written = write_frame(&mut sink, &header, b"0123456789").await.unwrap();
        assert_eq!(written, HEADER_SIZE + 10);

        let frames = FrameBuffer::new().push(&sink.out).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id(), 7);
        assert_eq!(frames[0].payload(), b"0123456789");
    }
}
