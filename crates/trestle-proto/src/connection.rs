//! Byte-stream connection abstraction.
//!
//! The transfer engine runs over any bidirectional byte stream between two
//! paired devices. The concrete transport (TCP, in-memory loopback, a tunnel
//! provided by the pairing layer) lives outside this crate; the codec only
//! needs ordered, reliable `send`/`receive`.

use async_trait::async_trait;
use std::io;

/// A reliable, ordered bidirectional byte stream.
#[async_trait]
pub trait Connection: Send {
    /// Send all of `buf` to the peer.
    async fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Receive at least `min` and at most `max` bytes.
    ///
    /// Returns fewer than `min` bytes only by failing with
    /// `io::ErrorKind::UnexpectedEof` when the peer closes early.
    async fn receive(&mut self, min: usize, max: usize) -> io::Result<Vec<u8>>;
}

#[async_trait]
impl<T: Connection + ?Sized> Connection for Box<T> {
    async fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).send(buf).await
    }

    async fn receive(&mut self, min: usize, max: usize) -> io::Result<Vec<u8>> {
        (**self).receive(min, max).await
    }
}
