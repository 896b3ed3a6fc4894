//! Per-chunk processing pipeline.
//!
//! Send side: compress, encrypt, checksum, in that order. The checksum
//! covers the exact payload bytes placed on the wire, so the receive side
//! verifies it before touching the AEAD. A window of chunks fans out across
//! blocking worker tasks (capped at [`MAX_WINDOW`]) and fans back in sorted
//! by original index, keeping wire order deterministic.

use crate::error::{FileError, Result};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinSet;
use trestle_crypto::{Nonce, SessionKey, Tag};
use trestle_proto::ChunkPacket;

/// Upper bound on concurrent pipeline workers per window.
pub const MAX_WINDOW: usize = 8;

/// Pipeline window width: available parallelism capped at [`MAX_WINDOW`].
#[must_use]
pub fn window_size() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(MAX_WINDOW)
        .min(MAX_WINDOW)
}

/// Compression seam for the chunk pipeline.
pub trait Compressor: Send + Sync {
    /// Compress a chunk payload.
    ///
    /// # Errors
    ///
    /// Returns `FileError::Compression` on encoder failure.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a chunk payload.
    ///
    /// # Errors
    ///
    /// Returns `FileError::Compression` on malformed input.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Raw DEFLATE compressor.
pub struct DeflateCompressor {
    level: flate2::Compression,
}

impl DeflateCompressor {
    /// Compressor at the given flate2 level.
    #[must_use]
    pub fn new(level: flate2::Compression) -> Self {
        Self { level }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new(flate2::Compression::default())
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(data)
            .and_then(|()| encoder.finish())
            .map_err(|e| FileError::Compression(format!("deflate: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = flate2::write::DeflateDecoder::new(Vec::new());
        decoder
            .write_all(data)
            .and_then(|()| decoder.finish())
            .map_err(|e| FileError::Compression(format!("inflate: {e}")))
    }
}

/// Lower-hex SHA-256 of a payload, as carried in the chunk header.
#[must_use]
pub fn payload_checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Turns raw file chunks into wire packets and back.
#[derive(Clone)]
pub struct ChunkPipeline {
    transfer_id: String,
    total_chunks: u32,
    compressor: Option<Arc<dyn Compressor>>,
    key: Option<SessionKey>,
}

impl ChunkPipeline {
    /// Pipeline for a transfer. `compressor` enables per-chunk compression,
    /// `key` enables per-chunk encryption.
    #[must_use]
    pub fn new(
        transfer_id: impl Into<String>,
        total_chunks: u32,
        compressor: Option<Arc<dyn Compressor>>,
        key: Option<SessionKey>,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            total_chunks,
            compressor,
            key,
        }
    }

    /// Process one raw chunk into a wire packet.
    ///
    /// # Errors
    ///
    /// Returns `FileError::IndexOutOfBounds` for a bad index, or
    /// compression/encryption failures.
    pub fn encode_chunk(&self, index: u32, data: Vec<u8>) -> Result<ChunkPacket> {
        if index >= self.total_chunks {
            return Err(FileError::IndexOutOfBounds {
                index,
                total: self.total_chunks,
            });
        }

        let compressed = self.compressor.is_some();
        let payload = match &self.compressor {
            Some(c) => c.compress(&data)?,
            None => data,
        };

        let (payload, nonce, tag) = match &self.key {
            Some(key) => {
                let nonce = Nonce::generate(&mut OsRng);
                let (ciphertext, tag) = key.seal(&nonce, &[], &payload)?;
                (ciphertext, Some(*nonce.as_bytes()), Some(*tag.as_bytes()))
            }
            None => (payload, None, None),
        };

        let checksum = payload_checksum(&payload);

        Ok(ChunkPacket {
            transfer_id: self.transfer_id.clone(),
            index,
            total: self.total_chunks,
            payload,
            checksum,
            compressed,
            encrypted: self.key.is_some(),
            timestamp_ms: unix_millis(),
            nonce,
            tag,
        })
    }

    /// Process a window of raw chunks concurrently, returning packets sorted
    /// by original index.
    ///
    /// Fan-out is capped at [`MAX_WINDOW`] blocking workers; larger windows
    /// are processed in batches.
    ///
    /// # Errors
    ///
    /// Returns the first chunk error, or `FileError::Worker` if a worker
    /// task failed to complete.
    pub async fn encode_window(&self, window: Vec<(u32, Vec<u8>)>) -> Result<Vec<ChunkPacket>> {
        let mut packets = Vec::with_capacity(window.len());

        for batch in window.chunks(MAX_WINDOW) {
            let mut tasks = JoinSet::new();
            for (index, data) in batch {
                let pipeline = self.clone();
                let index = *index;
                let data = data.clone();
                tasks.spawn_blocking(move || pipeline.encode_chunk(index, data));
            }

            while let Some(joined) = tasks.join_next().await {
                let packet = joined.map_err(|e| FileError::Worker(e.to_string()))??;
                packets.push(packet);
            }
        }

        packets.sort_by_key(|p| p.index);
        Ok(packets)
    }

    /// Reverse the pipeline for one received packet: verify the checksum,
    /// decrypt if a per-chunk tag is present, decompress.
    ///
    /// Streamed transfers carry pre-encrypted bytes with the encrypted flag
    /// clear, so those pass through here untouched by the AEAD.
    ///
    /// # Errors
    ///
    /// Returns `FileError::ChecksumMismatch` if the payload does not match
    /// its checksum, or decryption/decompression failures.
    pub fn decode_chunk(&self, packet: &ChunkPacket) -> Result<Vec<u8>> {
        if payload_checksum(&packet.payload) != packet.checksum {
            return Err(FileError::ChecksumMismatch {
                index: packet.index,
            });
        }

        let data = match (packet.encrypted, &packet.nonce, &packet.tag) {
            (true, Some(nonce), Some(tag)) => {
                let key = self.key.as_ref().ok_or_else(|| {
                    FileError::Crypto(trestle_crypto::CryptoError::Decrypt(
                        "received encrypted chunk without a session key".into(),
                    ))
                })?;
                key.open(
                    &Nonce::from_bytes(*nonce),
                    &[],
                    &packet.payload,
                    &Tag::from_bytes(*tag),
                )?
            }
            _ => packet.payload.clone(),
        };

        if packet.compressed {
            let compressor = self
                .compressor
                .as_ref()
                .ok_or_else(|| FileError::Compression("no decompressor configured".into()))?;
            compressor.decompress(&data)
        } else {
            Ok(data)
        }
    }
}
