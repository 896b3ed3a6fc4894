//! AES-256-GCM AEAD with detached tags.
//!
//! Provides authenticated encryption with:
//! - 256-bit keys, zeroized on drop
//! - 96-bit nonces (random for per-chunk use, counter-derived for the
//!   streaming encryptor)
//! - 128-bit detached authentication tags, carried separately on the wire

use crate::error::CryptoError;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use rand_core::{CryptoRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// AEAD key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes / 128 bits).
pub const TAG_SIZE: usize = 16;

/// AES-GCM nonce (12 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a random nonce.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create a nonce from a counter value and a 4-byte salt.
    ///
    /// The counter fills the first 8 bytes (big-endian); the salt fills the
    /// rest. Used by the streaming encryptor, where both sides derive the
    /// same salt and number segments identically.
    #[must_use]
    pub fn from_counter(counter: u64, salt: &[u8; 4]) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..8].copy_from_slice(&counter.to_be_bytes());
        bytes[8..].copy_from_slice(salt);
        Self(bytes)
    }

    /// Raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Detached authentication tag (16 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag([u8; TAG_SIZE]);

impl Tag {
    /// Create a tag from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw tag bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }
}

/// Session encryption key (32 bytes), zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` unless the slice is 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes. Handle with care.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encrypt `plaintext`, returning ciphertext and a detached tag.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encrypt` if the cipher rejects the input.
    pub fn seal(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Tag), CryptoError> {
        let cipher = self.cipher()?;
        let mut combined = cipher
            .encrypt(
                aes_gcm::Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::Encrypt(format!("aead encrypt: {e}")))?;

        // aes-gcm appends the tag to the ciphertext; detach it.
        let tag_start = combined.len() - TAG_SIZE;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&combined[tag_start..]);
        combined.truncate(tag_start);
        Ok((combined, Tag(tag)))
    }

    /// Decrypt `ciphertext` with a detached tag.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decrypt` on tag verification failure.
    pub fn open(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
        tag: &Tag,
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher()?;
        let mut combined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(tag.as_bytes());
        cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: &combined,
                    aad,
                },
            )
            .map_err(|e| CryptoError::Decrypt(format!("aead decrypt: {e}")))
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| CryptoError::Encrypt(format!("key init: {e}")))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn seal_open_roundtrip() {
        let key = SessionKey::generate(&mut OsRng);
        let nonce = Nonce::generate(&mut OsRng);
        let (ct, tag) = key.seal(&nonce, b"aad", b"chunk payload").unwrap();
        assert_ne!(ct, b"chunk payload");
        let pt = key.open(&nonce, b"aad", &ct, &tag).unwrap();
        assert_eq!(pt, b"chunk payload");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = SessionKey::generate(&mut OsRng);
        let nonce = Nonce::generate(&mut OsRng);
        let (mut ct, tag) = key.seal(&nonce, b"", b"payload").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(
            key.open(&nonce, b"", &ct, &tag),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn tampered_tag_fails() {
        let key = SessionKey::generate(&mut OsRng);
        let nonce = Nonce::generate(&mut OsRng);
        let (ct, tag) = key.seal(&nonce, b"", b"payload").unwrap();
        let mut bad = *tag.as_bytes();
        bad[15] ^= 0x80;
        assert!(key.open(&nonce, b"", &ct, &Tag::from_bytes(bad)).is_err());
    }

    #[test]
    fn wrong_aad_fails() {
        let key = SessionKey::generate(&mut OsRng);
        let nonce = Nonce::generate(&mut OsRng);
        let (ct, tag) = key.seal(&nonce, b"transfer-1", b"payload").unwrap();
        assert!(key.open(&nonce, b"transfer-2", &ct, &tag).is_err());
    }

    #[test]
    fn counter_nonce_layout() {
        let nonce = Nonce::from_counter(0x0102_0304_0506_0708, &[9, 10, 11, 12]);
        assert_eq!(
            nonce.as_bytes(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
        );
    }

    #[test]
    fn key_from_slice_length_checked() {
        assert!(SessionKey::from_slice(&[0u8; 16]).is_err());
        assert!(SessionKey::from_slice(&[0u8; 32]).is_ok());
    }
}
