//! Transfer error taxonomy.
//!
//! Six classes with distinct handling: only `Network` errors are retried by
//! the queue; everything else either fails the transfer outright or, for
//! `Cancelled`, ends it without counting as a failure.

use thiserror::Error;
use trestle_crypto::CryptoError;
use trestle_files::FileError;
use trestle_proto::ProtocolError;

/// Error raised by a transfer session or the queue.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed header, message, or protocol sequence. Fatal; the
    /// connection is closed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Checksum, whole-file hash, Merkle root, or signature mismatch.
    /// Fatal; partial output is discarded and never retried.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Timeout, connection loss, or generic I/O. Retriable with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// Missing file, permission denied, or disk exhaustion. Fatal and
    /// surfaced immediately.
    #[error("resource error: {0}")]
    Resource(String),

    /// Tamper or threat detected after receipt. Fatal; the output file is
    /// never exposed as complete.
    #[error("security error: {0}")]
    Security(String),

    /// Invalid local configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// User-initiated cancellation. Not a failure; cleanup only.
    #[error("transfer cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the queue may retry a transfer that failed with this error.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Network(_))
    }
}

impl From<ProtocolError> for EngineError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => EngineError::Network(e.to_string()),
            ProtocolError::ConnectionClosed => {
                EngineError::Network("connection closed by peer".into())
            }
            ProtocolError::InvalidHeader(_) | ProtocolError::InvalidBody(_) => {
                EngineError::Protocol(err.to_string())
            }
        }
    }
}

fn classify_io(err: &std::io::Error, context: &str) -> EngineError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            EngineError::Resource(format!("{context}: {err}"))
        }
        // StorageFull is not stable on all platforms; raw ENOSPC shows up
        // as Other, which falls through to Network like any transient I/O.
        _ => EngineError::Network(format!("{context}: {err}")),
    }
}

impl From<FileError> for EngineError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Io(e) => classify_io(&e, "file I/O"),
            FileError::ChecksumMismatch { .. } => EngineError::Integrity(err.to_string()),
            FileError::Compression(_) => EngineError::Integrity(err.to_string()),
            FileError::Crypto(e) => e.into(),
            FileError::IndexOutOfBounds { .. } | FileError::Incomplete { .. } => {
                EngineError::Protocol(err.to_string())
            }
            FileError::Worker(msg) => EngineError::Resource(format!("worker failed: {msg}")),
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decrypt(_) | CryptoError::HmacMismatch | CryptoError::Signature(_) => {
                EngineError::Integrity(err.to_string())
            }
            CryptoError::Io(e) => classify_io(&e, "key I/O"),
            CryptoError::Store(_) => EngineError::Resource(err.to_string()),
            CryptoError::InvalidKeyLength { .. }
            | CryptoError::Encrypt(_)
            | CryptoError::Derivation(_) => EngineError::Security(err.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        classify_io(&err, "I/O")
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
