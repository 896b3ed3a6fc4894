//! # Trestle Crypto
//!
//! Key management and transfer cryptography for Trestle.
//!
//! This crate provides:
//! - AES-256-GCM AEAD with 12-byte nonces and detached 16-byte tags
//! - HKDF-SHA256 session-key derivation with domain-separated labels
//! - Per-peer master key persistence and session rotation policy
//! - Streaming large-file encryption with an aggregate ciphertext HMAC
//! - Ed25519 signing provider
//! - Cipher-suite negotiation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod manager;
pub mod sign;
pub mod store;
pub mod stream;
pub mod suite;

pub use aead::{Nonce, SessionKey, Tag, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::CryptoError;
pub use manager::{KeyManager, RotationPolicy, MASTER_KEY_LEN, SESSION_SALT_LEN};
pub use sign::{Ed25519Signer, Ed25519Verifier, Signer, Verifier};
pub use store::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use suite::CipherSuite;
