//! Framed message reader/writer over a [`Connection`].
//!
//! Each message is an 8-byte [`WireHeader`] followed by the declared number
//! of body bytes. Bodies are read in sub-slices of at most
//! [`READ_SLICE_SIZE`] bytes so that a hostile or merely huge chunk never
//! forces a single oversized read, keeping peak read memory bounded
//! independent of the negotiated chunk size.

use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::header::{MessageType, WireHeader, WIRE_HEADER_SIZE};
use crate::{ACK_OK, READ_SLICE_SIZE};

/// Framed message stream over a byte-stream connection.
pub struct Framed<C: Connection> {
    conn: C,
}

impl<C: Connection> Framed<C> {
    /// Wrap a connection.
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    /// Consume the frame, returning the underlying connection.
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Write one message: header then body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` if the body exceeds `u32::MAX`
    /// bytes, or an I/O error from the connection.
    pub async fn write_message(
        &mut self,
        message_type: MessageType,
        body: &[u8],
    ) -> Result<(), ProtocolError> {
        let length = u32::try_from(body.len())
            .map_err(|_| ProtocolError::InvalidBody("message body exceeds u32 length".into()))?;
        let header = WireHeader::new(message_type, length);
        self.conn.send(&header.encode()).await?;
        if !body.is_empty() {
            self.conn.send(body).await?;
        }
        tracing::trace!(?message_type, length, "wrote message");
        Ok(())
    }

    /// Read one message: header then exactly the declared body bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidHeader` for unknown types or absurd
    /// lengths, `ProtocolError::ConnectionClosed` if the peer closes before
    /// the declared length arrives, or an I/O error from the connection.
    pub async fn read_message(&mut self) -> Result<(MessageType, Vec<u8>), ProtocolError> {
        let header_bytes = self.receive_exact(WIRE_HEADER_SIZE).await?;
        let header = WireHeader::decode(&header_bytes)?;

        let total = header.length as usize;
        let mut body = Vec::with_capacity(total.min(READ_SLICE_SIZE));
        while body.len() < total {
            let want = (total - body.len()).min(READ_SLICE_SIZE);
            let slice = self.receive_exact(want).await?;
            body.extend_from_slice(&slice);
        }

        tracing::trace!(message_type = ?header.message_type, length = total, "read message");
        Ok((header.message_type, body))
    }

    /// Write the single-byte acknowledgement that gates chunk flow control.
    ///
    /// # Errors
    ///
    /// Returns an I/O error from the connection.
    pub async fn write_ack(&mut self) -> Result<(), ProtocolError> {
        self.conn.send(&[ACK_OK]).await?;
        Ok(())
    }

    /// Read the peer's single-byte acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` for any byte other than
    /// [`ACK_OK`], or `ProtocolError::ConnectionClosed` on early close.
    pub async fn read_ack(&mut self) -> Result<(), ProtocolError> {
        let byte = self.receive_exact(1).await?;
        if byte[0] == ACK_OK {
            Ok(())
        } else {
            Err(ProtocolError::InvalidBody(format!(
                "unexpected ack byte 0x{:02x}",
                byte[0]
            )))
        }
    }

    async fn receive_exact(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        match self.conn.receive(len, len).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::ConnectionClosed)
            }
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;

    /// In-process pipe: written bytes queue up for the reader side.
    #[derive(Default)]
    struct PipeConnection {
        buf: VecDeque<u8>,
    }

    #[async_trait]
    impl Connection for PipeConnection {
        async fn send(&mut self, buf: &[u8]) -> io::Result<()> {
            self.buf.extend(buf);
            Ok(())
        }

        async fn receive(&mut self, min: usize, max: usize) -> io::Result<Vec<u8>> {
            if self.buf.len() < min {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "pipe drained"));
            }
            let take = self.buf.len().min(max);
            Ok(self.buf.drain(..take).collect())
        }
    }

    #[tokio::test]
    async fn message_roundtrip() {
        let mut framed = Framed::new(PipeConnection::default());
        framed
            .write_message(MessageType::Metadata, b"{\"k\":1}")
            .await
            .unwrap();
        let (mt, body) = framed.read_message().await.unwrap();
        assert_eq!(mt, MessageType::Metadata);
        assert_eq!(body, b"{\"k\":1}");
    }

    #[tokio::test]
    async fn large_body_reassembled_from_slices() {
        let mut framed = Framed::new(PipeConnection::default());
        let body = vec![0x5Au8; READ_SLICE_SIZE * 3 + 17];
        framed
            .write_message(MessageType::Chunk, &body)
            .await
            .unwrap();
        let (mt, read) = framed.read_message().await.unwrap();
        assert_eq!(mt, MessageType::Chunk);
        assert_eq!(read, body);
    }

    #[tokio::test]
    async fn truncated_body_reports_closed() {
        let mut framed = Framed::new(PipeConnection::default());
        let header = WireHeader::new(MessageType::Chunk, 100);
        framed.conn.send(&header.encode()).await.unwrap();
        framed.conn.send(&[0u8; 10]).await.unwrap();
        let err = framed.read_message().await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn ack_roundtrip() {
        let mut framed = Framed::new(PipeConnection::default());
        framed.write_ack().await.unwrap();
        framed.read_ack().await.unwrap();
    }

    #[tokio::test]
    async fn bad_ack_byte_rejected() {
        let mut framed = Framed::new(PipeConnection::default());
        framed.conn.send(&[0x42]).await.unwrap();
        assert!(framed.read_ack().await.is_err());
    }
}
