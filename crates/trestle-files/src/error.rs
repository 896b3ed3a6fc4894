//! Error types for file chunking and pipeline processing.

use thiserror::Error;
use trestle_crypto::CryptoError;

/// Errors from chunking, reassembly, or the chunk pipeline.
#[derive(Debug, Error)]
pub enum FileError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Per-chunk encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A chunk checksum did not match the received payload.
    #[error("chunk {index} checksum mismatch")]
    ChecksumMismatch {
        /// Index of the offending chunk.
        index: u32,
    },

    /// Chunk index outside the declared total.
    #[error("chunk index {index} out of bounds (total {total})")]
    IndexOutOfBounds {
        /// Offending index.
        index: u32,
        /// Declared chunk count.
        total: u32,
    },

    /// Reassembly finalized before all chunks arrived.
    #[error("transfer incomplete: {received}/{total} chunks received")]
    Incomplete {
        /// Chunks written so far.
        received: u32,
        /// Declared chunk count.
        total: u32,
    },

    /// A pipeline worker task panicked or was cancelled.
    #[error("pipeline worker failed: {0}")]
    Worker(String),
}

/// Result type for file operations.
pub type Result<T> = std::result::Result<T, FileError>;
