//! Whole-file integrity: streamed SHA-256 and a chunk-level Merkle root.
//!
//! Both the file hash and the Merkle leaves are computed over plaintext at
//! the transfer's chunk size, so sender and receiver agree regardless of
//! compression or encryption applied on the wire.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Streamed SHA-256 of a file, lower-hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn file_sha256_hex(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of each chunk-size slice of a file, in index order.
///
/// Returns an empty vec for an empty file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn file_chunk_hashes(path: &Path, chunk_size: usize) -> Result<Vec<[u8; 32]>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hashes = Vec::new();
    let mut buf = vec![0u8; chunk_size];

    loop {
        let mut filled = 0;
        while filled < chunk_size {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        hashes.push(Sha256::digest(&buf[..filled]).into());
        if filled < chunk_size {
            break;
        }
    }

    Ok(hashes)
}

/// Merkle root over chunk hashes.
///
/// Each level pairs adjacent nodes and hashes their concatenation; an odd
/// node at the end of a level is paired with itself. Returns `None` for an
/// empty leaf set (empty file), which the metadata omits.
#[must_use]
pub fn merkle_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(pair[0]);
            hasher.update(pair.get(1).unwrap_or(&pair[0]));
            next.push(hasher.finalize().into());
        }
        level = next;
    }

    Some(level[0])
}

/// Merkle root of a file at the given chunk size, lower-hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn merkle_root_hex(path: &Path, chunk_size: usize) -> Result<Option<String>> {
    let hashes = file_chunk_hashes(path, chunk_size)?;
    Ok(merkle_root(&hashes).map(hex::encode))
}
