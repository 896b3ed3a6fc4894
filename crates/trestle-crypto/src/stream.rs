//! Streaming large-file encryption.
//!
//! Files above the large-file threshold are pre-transformed into a temporary
//! ciphertext file before chunking, so the chunk pipeline does not pay for
//! per-chunk AEAD on multi-gigabyte inputs. The ciphertext is a sequence of
//! 64 KiB AES-GCM segments, each followed by its 16-byte tag; segment nonces
//! are counter-derived from a salt both sides compute with
//! [`crate::kdf::derive_stream_nonce_salt`], so no nonce travels on the wire.
//!
//! An HMAC-SHA256 over the full ciphertext is produced during encryption and
//! carried in the COMPLETE extension as the aggregate integrity value.

use crate::aead::{Nonce, SessionKey, TAG_SIZE};
use crate::error::CryptoError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Plaintext segment size (64 KiB).
pub const SEGMENT_SIZE: usize = 64 * 1024;

type HmacSha256 = Hmac<Sha256>;

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Encrypt `src` into the ciphertext file `dst`, returning the aggregate
/// HMAC over the ciphertext.
///
/// # Errors
///
/// Returns `CryptoError::Io` on file errors or `CryptoError::Encrypt` if a
/// segment fails to seal.
pub fn encrypt_file(
    src: &Path,
    dst: &Path,
    key: &SessionKey,
    nonce_salt: &[u8; 4],
    hmac_key: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dst)?);
    let mut mac = HmacSha256::new_from_slice(hmac_key)
        .map_err(|e| CryptoError::Derivation(format!("hmac init: {e}")))?;

    let mut segment = vec![0u8; SEGMENT_SIZE];
    let mut counter = 0u64;
    loop {
        let n = read_full(&mut reader, &mut segment)?;
        if n == 0 {
            break;
        }

        let nonce = Nonce::from_counter(counter, nonce_salt);
        let (ciphertext, tag) = key.seal(&nonce, &[], &segment[..n])?;
        mac.update(&ciphertext);
        mac.update(tag.as_bytes());
        writer.write_all(&ciphertext)?;
        writer.write_all(tag.as_bytes())?;
        counter += 1;

        if n < SEGMENT_SIZE {
            break;
        }
    }

    writer.flush()?;
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    tracing::debug!(segments = counter, src = %src.display(), "streamed encryption complete");
    Ok(out)
}

/// Decrypt the ciphertext file `src` (produced by [`encrypt_file`]) into
/// `dst`.
///
/// # Errors
///
/// Returns `CryptoError::Decrypt` if any segment fails authentication.
pub fn decrypt_file(
    src: &Path,
    dst: &Path,
    key: &SessionKey,
    nonce_salt: &[u8; 4],
) -> Result<(), CryptoError> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dst)?);

    let mut segment = vec![0u8; SEGMENT_SIZE + TAG_SIZE];
    let mut counter = 0u64;
    loop {
        let n = read_full(&mut reader, &mut segment)?;
        if n == 0 {
            break;
        }
        if n <= TAG_SIZE {
            return Err(CryptoError::Decrypt(format!(
                "truncated segment {counter}: {n} bytes"
            )));
        }

        let (ciphertext, tag_bytes) = segment[..n].split_at(n - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);
        let nonce = Nonce::from_counter(counter, nonce_salt);
        let plaintext = key.open(&nonce, &[], ciphertext, &crate::aead::Tag::from_bytes(tag))?;
        writer.write_all(&plaintext)?;
        counter += 1;

        if n < SEGMENT_SIZE + TAG_SIZE {
            break;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Compute the aggregate HMAC over an existing ciphertext file.
///
/// # Errors
///
/// Returns `CryptoError::Io` on file errors.
pub fn ciphertext_hmac(path: &Path, hmac_key: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut mac = HmacSha256::new_from_slice(hmac_key)
        .map_err(|e| CryptoError::Derivation(format!("hmac init: {e}")))?;

    let mut buf = vec![0u8; SEGMENT_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
    }

    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Verify the aggregate HMAC of a ciphertext file in constant time.
///
/// # Errors
///
/// Returns `CryptoError::HmacMismatch` if the tag does not match.
pub fn verify_ciphertext_hmac(
    path: &Path,
    hmac_key: &[u8; 32],
    expected: &[u8],
) -> Result<(), CryptoError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut mac = HmacSha256::new_from_slice(hmac_key)
        .map_err(|e| CryptoError::Derivation(format!("hmac init: {e}")))?;

    let mut buf = vec![0u8; SEGMENT_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
    }

    mac.verify_slice(expected)
        .map_err(|_| CryptoError::HmacMismatch)
}
