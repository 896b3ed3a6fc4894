//! # Trestle Files
//!
//! File chunking, reassembly, the per-chunk processing pipeline, and
//! whole-file integrity (SHA-256 and Merkle root).
//!
//! The sending side reads a file through [`FileChunker`], pushes windows of
//! raw chunks through [`ChunkPipeline`] (compress, encrypt, checksum), and
//! emits [`trestle_proto::ChunkPacket`]s in index order. The receiving side
//! reverses the pipeline per chunk and writes through [`FileReassembler`],
//! which tolerates out-of-order arrival and mid-file resume.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod error;
pub mod integrity;
pub mod pipeline;

pub use chunker::{FileChunker, FileReassembler};
pub use error::FileError;
pub use integrity::{file_chunk_hashes, file_sha256_hex, merkle_root, merkle_root_hex};
pub use pipeline::{
    payload_checksum, window_size, ChunkPipeline, Compressor, DeflateCompressor, MAX_WINDOW,
};

/// Default chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Smallest chunk size accepted by transfer configuration (64 KiB).
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;
