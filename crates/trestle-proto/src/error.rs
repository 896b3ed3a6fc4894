//! Error types for the wire codec.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header was malformed: unknown message type, impossible length, or a
    /// body shorter than the declared length.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Body bytes did not match the layout declared for the message type.
    #[error("invalid message body: {0}")]
    InvalidBody(String),

    /// The peer closed the connection mid-message.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Underlying transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
