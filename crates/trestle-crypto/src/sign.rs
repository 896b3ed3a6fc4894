//! Transfer signing providers.
//!
//! Metadata for a transfer can optionally carry a detached signature over the
//! file hash, letting the receiver attribute the transfer to a known peer.
//! The provider seam is trait-based so deployments can plug in hardware-backed
//! keys; the stock implementation is Ed25519.

use crate::error::CryptoError;
use ed25519_dalek::{Signature, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use std::collections::HashMap;

/// Signs transfer digests on behalf of the local peer.
pub trait Signer: Send + Sync {
    /// Identifier the receiver uses to look up the verifying key.
    fn signer_id(&self) -> &str;

    /// Name of the signature algorithm, carried in metadata.
    fn algorithm(&self) -> &'static str;

    /// Produce a detached signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` if signing fails.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Verifies transfer signatures from remote peers.
pub trait Verifier: Send + Sync {
    /// Check `signature` over `message` for the peer named `signer_id`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` when the signer is unknown, the
    /// signature is malformed, or verification fails.
    fn verify(&self, signer_id: &str, message: &[u8], signature: &[u8]) -> Result<(), CryptoError>;
}

/// Ed25519 signer backed by an in-memory signing key.
pub struct Ed25519Signer {
    key: SigningKey,
    signer_id: String,
}

impl Ed25519Signer {
    /// Wrap an existing signing key.
    pub fn new(key: SigningKey, signer_id: impl Into<String>) -> Self {
        Self {
            key,
            signer_id: signer_id.into(),
        }
    }

    /// Generate a fresh keypair.
    pub fn generate(signer_id: impl Into<String>) -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
            signer_id: signer_id.into(),
        }
    }

    /// Load a signer from 32 bytes of secret key material.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if `bytes` is not 32 bytes.
    pub fn from_bytes(bytes: &[u8], signer_id: impl Into<String>) -> Result<Self, CryptoError> {
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self {
            key: SigningKey::from_bytes(&secret),
            signer_id: signer_id.into(),
        })
    }

    /// The public half of the keypair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl Signer for Ed25519Signer {
    fn signer_id(&self) -> &str {
        &self.signer_id
    }

    fn algorithm(&self) -> &'static str {
        "ed25519"
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        use ed25519_dalek::Signer as _;
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

/// Ed25519 verifier holding the verifying keys of trusted peers.
#[derive(Default)]
pub struct Ed25519Verifier {
    keys: HashMap<String, VerifyingKey>,
}

impl Ed25519Verifier {
    /// Create an empty verifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trusted peer's verifying key.
    pub fn add_peer(&mut self, signer_id: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(signer_id.into(), key);
    }

    /// Register a trusted peer from raw 32-byte public key material.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` if the bytes are not a valid point.
    pub fn add_peer_bytes(
        &mut self,
        signer_id: impl Into<String>,
        bytes: &[u8],
    ) -> Result<(), CryptoError> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Signature("public key must be 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&raw)
            .map_err(|e| CryptoError::Signature(format!("invalid public key: {e}")))?;
        self.keys.insert(signer_id.into(), key);
        Ok(())
    }
}

impl Verifier for Ed25519Verifier {
    fn verify(&self, signer_id: &str, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let key = self
            .keys
            .get(signer_id)
            .ok_or_else(|| CryptoError::Signature(format!("unknown signer: {signer_id}")))?;
        let sig = Signature::from_slice(signature)
            .map_err(|e| CryptoError::Signature(format!("malformed signature: {e}")))?;
        key.verify(message, &sig)
            .map_err(|_| CryptoError::Signature(format!("verification failed for {signer_id}")))
    }
}
