//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur in key management and transfer cryptography.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material had the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes.
        expected: usize,
        /// Provided length in bytes.
        actual: usize,
    },

    /// AEAD encryption failed.
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// AEAD decryption or tag verification failed.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    Derivation(String),

    /// The key store could not read or write key material.
    #[error("key store error: {0}")]
    Store(String),

    /// Signature creation or verification failed.
    #[error("signature error: {0}")]
    Signature(String),

    /// Aggregate HMAC verification failed for a streamed file.
    #[error("aggregate HMAC mismatch")]
    HmacMismatch,

    /// File I/O during streaming encryption/decryption.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
