//! Byte-stream adapter implementing the protocol [`Connection`] trait.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use trestle_proto::Connection;

/// Wraps any async byte stream (TCP socket, duplex pipe) as a
/// [`Connection`].
pub struct StreamConnection<T> {
    stream: T,
}

impl<T> StreamConnection<T> {
    /// Wrap a stream.
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> T {
        self.stream
    }
}

#[async_trait]
impl<T> Connection for StreamConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }

    async fn receive(&mut self, min: usize, max: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let mut filled = 0;
        while filled < min {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed before minimum read",
                ));
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// In-process connected pair for tests and local transfers.
#[must_use]
pub fn loopback_pair(capacity: usize) -> (
    StreamConnection<DuplexStream>,
    StreamConnection<DuplexStream>,
) {
    let (a, b) = tokio::io::duplex(capacity);
    (StreamConnection::new(a), StreamConnection::new(b))
}
