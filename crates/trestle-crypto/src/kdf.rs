//! HKDF-SHA256 key derivation with domain-separated labels.
//!
//! Session keys are derived from a per-peer master key and a random session
//! salt. Each derivation uses a unique info label so keys for different
//! purposes are cryptographically independent.

use crate::aead::{SessionKey, KEY_SIZE};
use crate::error::CryptoError;
use hkdf::Hkdf;
use sha2::Sha256;

/// KDF labels for domain separation.
pub mod labels {
    /// Label for the per-session AEAD key.
    pub const SESSION_KEY: &[u8] = b"trestle-session-key";
    /// Label for the streaming encryptor's aggregate HMAC key.
    pub const STREAM_HMAC: &[u8] = b"trestle-stream-hmac";
    /// Label for the streaming encryptor's nonce salt.
    pub const STREAM_NONCE_SALT: &[u8] = b"trestle-stream-nonce-salt";
}

fn expand(master_key: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), master_key);
    hk.expand(info, out)
        .map_err(|e| CryptoError::Derivation(format!("hkdf expand: {e}")))
}

/// Derive the session AEAD key for a transfer.
///
/// # Errors
///
/// Returns `CryptoError::Derivation` if HKDF expansion fails.
pub fn derive_session_key(master_key: &[u8], salt: &[u8]) -> Result<SessionKey, CryptoError> {
    let mut okm = [0u8; KEY_SIZE];
    expand(master_key, salt, labels::SESSION_KEY, &mut okm)?;
    Ok(SessionKey::new(okm))
}

/// Derive the HMAC key used to authenticate a streamed ciphertext file.
///
/// # Errors
///
/// Returns `CryptoError::Derivation` if HKDF expansion fails.
pub fn derive_stream_hmac_key(master_key: &[u8], salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut okm = [0u8; 32];
    expand(master_key, salt, labels::STREAM_HMAC, &mut okm)?;
    Ok(okm)
}

/// Derive the 4-byte nonce salt for the streaming encryptor's counter nonces.
///
/// Deterministic on both sides, so segment nonces never travel on the wire.
///
/// # Errors
///
/// Returns `CryptoError::Derivation` if HKDF expansion fails.
pub fn derive_stream_nonce_salt(master_key: &[u8], salt: &[u8]) -> Result<[u8; 4], CryptoError> {
    let mut okm = [0u8; 4];
    expand(master_key, salt, labels::STREAM_NONCE_SALT, &mut okm)?;
    Ok(okm)
}
