//! # Trestle Proto
//!
//! Wire codec for the Trestle transfer protocol.
//!
//! This crate provides:
//! - Fixed 8-byte message header encoding/decoding
//! - Typed message bodies (metadata, chunk, complete, resume request/ack)
//! - A framed reader/writer over a byte-stream [`Connection`] with bounded
//!   peak memory for large bodies

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod connection;
pub mod error;
pub mod framed;
pub mod header;
pub mod message;

pub use chunk::ChunkPacket;
pub use connection::Connection;
pub use error::ProtocolError;
pub use framed::Framed;
pub use header::{MessageType, WireHeader, WIRE_HEADER_SIZE};
pub use message::{
    decode_resume_ack, encode_resume_ack, CompleteMessage, FileMetadataMessage, ResumeRequest,
};

/// Length of a transfer id on the wire (UUID string, zero-padded).
pub const TRANSFER_ID_LEN: usize = 36;

/// Sub-read granularity for large message bodies (64 KiB).
///
/// Bodies longer than this are read in bounded slices so peak read memory
/// stays independent of the negotiated chunk size.
pub const READ_SLICE_SIZE: usize = 64 * 1024;

/// Acknowledgement byte exchanged after metadata, each chunk, and completion.
pub const ACK_OK: u8 = 0x01;
