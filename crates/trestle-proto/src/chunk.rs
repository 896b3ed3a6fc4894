//! Chunk packet encoding and decoding.
//!
//! A chunk body is a fixed 125-byte header followed by the payload and, when
//! the encrypted flag is set, a 12-byte AEAD nonce and a 16-byte tag:
//!
//! ```text
//!  Offset  Size  Field
//!  0       36    Transfer id (UTF-8, zero-padded)
//!  36      4     Chunk index (big-endian u32)
//!  40      4     Total chunk count (big-endian u32)
//!  44      8     Payload length (big-endian u64)
//!  52      64    SHA-256 checksum (lower-hex, space-padded)
//!  116     1     Flags (bit0 = compressed, bit1 = encrypted)
//!  117     8     Timestamp, unix millis (big-endian u64)
//!  125     N     Payload
//!  125+N   12    AEAD nonce (iff encrypted)
//!  137+N   16    AEAD tag (iff encrypted)
//! ```
//!
//! The checksum covers the exact payload bytes as placed on the wire, after
//! any compression and encryption.

use crate::error::ProtocolError;
use crate::TRANSFER_ID_LEN;

/// Size of the fixed chunk header preceding the payload.
pub const CHUNK_HEADER_SIZE: usize = TRANSFER_ID_LEN + 4 + 4 + 8 + 64 + 1 + 8;

/// AEAD nonce length carried per encrypted chunk.
pub const CHUNK_NONCE_LEN: usize = 12;

/// AEAD tag length carried per encrypted chunk.
pub const CHUNK_TAG_LEN: usize = 16;

const FLAG_COMPRESSED: u8 = 0b0000_0001;
const FLAG_ENCRYPTED: u8 = 0b0000_0010;

/// One chunk of file data as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPacket {
    /// Transfer this chunk belongs to (36-char UUID string).
    pub transfer_id: String,
    /// Zero-based chunk index.
    pub index: u32,
    /// Total number of chunks in the transfer.
    pub total: u32,
    /// Payload bytes exactly as placed on the wire.
    pub payload: Vec<u8>,
    /// Lower-hex SHA-256 of `payload`.
    pub checksum: String,
    /// Payload was compressed before (optional) encryption.
    pub compressed: bool,
    /// Payload is per-chunk AEAD ciphertext; `nonce` and `tag` are present.
    pub encrypted: bool,
    /// Send time, unix millis.
    pub timestamp_ms: u64,
    /// AEAD nonce, present iff `encrypted`.
    pub nonce: Option<[u8; CHUNK_NONCE_LEN]>,
    /// AEAD tag, present iff `encrypted`.
    pub tag: Option<[u8; CHUNK_TAG_LEN]>,
}

/// Write a transfer id into a fixed 36-byte zero-padded field.
pub(crate) fn encode_transfer_id(id: &str, out: &mut [u8]) -> Result<(), ProtocolError> {
    let bytes = id.as_bytes();
    if bytes.len() > TRANSFER_ID_LEN {
        return Err(ProtocolError::InvalidBody(format!(
            "transfer id longer than {TRANSFER_ID_LEN} bytes: {}",
            bytes.len()
        )));
    }
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Read a zero-padded 36-byte transfer id field back into a string.
pub(crate) fn decode_transfer_id(buf: &[u8]) -> Result<String, ProtocolError> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidBody("transfer id is not valid UTF-8".into()))
}

impl ChunkPacket {
    /// Encode the packet into a message body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` if the invariants do not hold:
    /// `index < total`, checksum is 64 bytes or less, and nonce/tag presence
    /// matches the encrypted flag.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.index >= self.total {
            return Err(ProtocolError::InvalidBody(format!(
                "chunk index {} out of range (total {})",
                self.index, self.total
            )));
        }
        if self.checksum.len() > 64 {
            return Err(ProtocolError::InvalidBody(
                "checksum longer than 64 bytes".into(),
            ));
        }
        if self.encrypted != (self.nonce.is_some() && self.tag.is_some()) {
            return Err(ProtocolError::InvalidBody(
                "nonce and tag must be present exactly when the encrypted flag is set".into(),
            ));
        }

        let trailer = if self.encrypted {
            CHUNK_NONCE_LEN + CHUNK_TAG_LEN
        } else {
            0
        };
        let mut buf = vec![0u8; CHUNK_HEADER_SIZE + self.payload.len() + trailer];

        encode_transfer_id(&self.transfer_id, &mut buf[..TRANSFER_ID_LEN])?;
        buf[36..40].copy_from_slice(&self.index.to_be_bytes());
        buf[40..44].copy_from_slice(&self.total.to_be_bytes());
        buf[44..52].copy_from_slice(&(self.payload.len() as u64).to_be_bytes());

        // Checksum field is space-padded, unlike the zero-padded transfer id.
        buf[52..116].fill(b' ');
        buf[52..52 + self.checksum.len()].copy_from_slice(self.checksum.as_bytes());

        let mut flags = 0u8;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        buf[116] = flags;
        buf[117..125].copy_from_slice(&self.timestamp_ms.to_be_bytes());

        buf[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + self.payload.len()]
            .copy_from_slice(&self.payload);

        if let (Some(nonce), Some(tag)) = (&self.nonce, &self.tag) {
            let off = CHUNK_HEADER_SIZE + self.payload.len();
            buf[off..off + CHUNK_NONCE_LEN].copy_from_slice(nonce);
            buf[off + CHUNK_NONCE_LEN..].copy_from_slice(tag);
        }

        Ok(buf)
    }

    /// Decode a chunk packet from a message body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` if the body is shorter than the
    /// declared payload length, the index is out of range, or the nonce/tag
    /// trailer is missing for an encrypted chunk.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return Err(ProtocolError::InvalidBody(format!(
                "chunk body too short: {} bytes",
                buf.len()
            )));
        }

        let transfer_id = decode_transfer_id(&buf[..TRANSFER_ID_LEN])?;
        let index = u32::from_be_bytes([buf[36], buf[37], buf[38], buf[39]]);
        let total = u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]);
        if index >= total {
            return Err(ProtocolError::InvalidBody(format!(
                "chunk index {index} out of range (total {total})"
            )));
        }

        let payload_len = u64::from_be_bytes([
            buf[44], buf[45], buf[46], buf[47], buf[48], buf[49], buf[50], buf[51],
        ]) as usize;

        let checksum = std::str::from_utf8(&buf[52..116])
            .map_err(|_| ProtocolError::InvalidBody("checksum is not valid UTF-8".into()))?
            .trim_end()
            .to_owned();

        let flags = buf[116];
        let compressed = flags & FLAG_COMPRESSED != 0;
        let encrypted = flags & FLAG_ENCRYPTED != 0;
        let timestamp_ms = u64::from_be_bytes([
            buf[117], buf[118], buf[119], buf[120], buf[121], buf[122], buf[123], buf[124],
        ]);

        let trailer = if encrypted {
            CHUNK_NONCE_LEN + CHUNK_TAG_LEN
        } else {
            0
        };
        let expected = CHUNK_HEADER_SIZE + payload_len + trailer;
        if buf.len() < expected {
            return Err(ProtocolError::InvalidBody(format!(
                "chunk body shorter than declared: {} < {expected}",
                buf.len()
            )));
        }

        let payload = buf[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + payload_len].to_vec();

        let (nonce, tag) = if encrypted {
            let off = CHUNK_HEADER_SIZE + payload_len;
            let mut nonce = [0u8; CHUNK_NONCE_LEN];
            nonce.copy_from_slice(&buf[off..off + CHUNK_NONCE_LEN]);
            let mut tag = [0u8; CHUNK_TAG_LEN];
            tag.copy_from_slice(&buf[off + CHUNK_NONCE_LEN..off + CHUNK_NONCE_LEN + CHUNK_TAG_LEN]);
            (Some(nonce), Some(tag))
        } else {
            (None, None)
        };

        Ok(Self {
            transfer_id,
            index,
            total,
            payload,
            checksum,
            compressed,
            encrypted,
            timestamp_ms,
            nonce,
            tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(encrypted: bool) -> ChunkPacket {
        ChunkPacket {
            transfer_id: "01234567-89ab-cdef-0123-456789abcdef".into(),
            index: 3,
            total: 10,
            payload: vec![0xAB; 512],
            checksum: "a".repeat(64),
            compressed: true,
            encrypted,
            timestamp_ms: 1_700_000_000_123,
            nonce: encrypted.then_some([7u8; CHUNK_NONCE_LEN]),
            tag: encrypted.then_some([9u8; CHUNK_TAG_LEN]),
        }
    }

    #[test]
    fn plaintext_roundtrip() {
        let packet = sample_packet(false);
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded.len(), CHUNK_HEADER_SIZE + 512);
        assert_eq!(ChunkPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn encrypted_roundtrip() {
        let packet = sample_packet(true);
        let encoded = packet.encode().unwrap();
        assert_eq!(
            encoded.len(),
            CHUNK_HEADER_SIZE + 512 + CHUNK_NONCE_LEN + CHUNK_TAG_LEN
        );
        assert_eq!(ChunkPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn short_checksum_is_space_padded() {
        let mut packet = sample_packet(false);
        packet.checksum = "abcd".into();
        let encoded = packet.encode().unwrap();
        assert_eq!(&encoded[52..56], b"abcd");
        assert_eq!(encoded[56], b' ');
        assert_eq!(ChunkPacket::decode(&encoded).unwrap().checksum, "abcd");
    }

    #[test]
    fn index_out_of_range_rejected() {
        let mut packet = sample_packet(false);
        packet.index = 10;
        assert!(packet.encode().is_err());
    }

    #[test]
    fn truncated_body_rejected() {
        let packet = sample_packet(false);
        let encoded = packet.encode().unwrap();
        let err = ChunkPacket::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidBody(_)));
    }

    #[test]
    fn missing_trailer_rejected() {
        let packet = sample_packet(true);
        let encoded = packet.encode().unwrap();
        // Cut into the nonce/tag trailer.
        let err = ChunkPacket::decode(&encoded[..CHUNK_HEADER_SIZE + 512 + 4]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidBody(_)));
    }

    #[test]
    fn mismatched_flag_and_trailer_rejected() {
        let mut packet = sample_packet(false);
        packet.encrypted = true;
        assert!(packet.encode().is_err());
    }
}
