//! Control message bodies: metadata, resume request/ack, complete.
//!
//! Metadata travels as JSON; the resume and complete bodies are small fixed
//! binary layouts whose first byte is an opcode.

use crate::chunk::{decode_transfer_id, encode_transfer_id};
use crate::error::ProtocolError;
use crate::TRANSFER_ID_LEN;
use serde::{Deserialize, Serialize};

/// Opcode byte opening a COMPLETE body.
pub const OPCODE_COMPLETE: u8 = 0x02;
/// Opcode byte opening a RESUME_REQUEST body.
pub const OPCODE_RESUME_REQUEST: u8 = 0x04;
/// Opcode byte forming the entire RESUME_ACK body.
pub const OPCODE_RESUME_ACK: u8 = 0x05;

const RESUME_REQUEST_LEN: usize = 1 + TRANSFER_ID_LEN + 8;

/// File metadata, sent once per transfer before any chunk.
///
/// The declared size and hash correspond to the exact plaintext byte
/// sequence verified on receipt. `wire_size` is the number of bytes that
/// actually travel as chunks, which differs from `file_size` when the file
/// was pre-encrypted by the streaming encryptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadataMessage {
    /// Transfer id (36-char UUID string).
    pub transfer_id: String,
    /// Original file name, without any path.
    pub file_name: String,
    /// Declared plaintext file size in bytes.
    pub file_size: u64,
    /// Number of bytes carried in chunks (ciphertext size in streamed mode).
    pub wire_size: u64,
    /// Lower-hex SHA-256 of the plaintext file.
    pub file_hash: String,
    /// Lower-hex Merkle root over per-chunk SHA-256 leaves, if computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    /// Hash algorithm name, e.g. `"sha-256"`.
    pub hash_algorithm: String,
    /// Chunks are compressed before encryption.
    pub compressed: bool,
    /// Transfer payload is encrypted.
    pub encrypted: bool,
    /// File was pre-encrypted as a whole by the streaming encryptor; chunks
    /// carry ciphertext without per-chunk nonce/tag and the aggregate HMAC
    /// travels in the COMPLETE extension.
    #[serde(default)]
    pub streamed: bool,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// Hex session-key salt, present iff `encrypted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_salt: Option<String>,
    /// Cipher suite the sender selected, e.g. `"hybrid"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<String>,
    /// Hex signature over the whole-file hash, if the sender signs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Signature algorithm name, e.g. `"ed25519"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<String>,
    /// Identifier of the signing peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,
}

impl FileMetadataMessage {
    /// Encode as a JSON message body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self)
            .map_err(|e| ProtocolError::InvalidBody(format!("metadata serialization: {e}")))
    }

    /// Decode from a JSON message body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` on malformed JSON.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(buf)
            .map_err(|e| ProtocolError::InvalidBody(format!("metadata parse: {e}")))
    }
}

/// Request to resume an interrupted transfer at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    /// Transfer to resume.
    pub transfer_id: String,
    /// Byte offset at which chunk exchange should continue.
    pub resume_offset: u64,
}

impl ResumeRequest {
    /// Encode as a 45-byte body: opcode + padded id + big-endian offset.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` if the id exceeds 36 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; RESUME_REQUEST_LEN];
        buf[0] = OPCODE_RESUME_REQUEST;
        encode_transfer_id(&self.transfer_id, &mut buf[1..1 + TRANSFER_ID_LEN])?;
        buf[1 + TRANSFER_ID_LEN..].copy_from_slice(&self.resume_offset.to_be_bytes());
        Ok(buf)
    }

    /// Decode from a message body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` on wrong length or opcode.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != RESUME_REQUEST_LEN {
            return Err(ProtocolError::InvalidBody(format!(
                "resume request must be {RESUME_REQUEST_LEN} bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != OPCODE_RESUME_REQUEST {
            return Err(ProtocolError::InvalidBody(format!(
                "resume request opcode 0x{:02x}",
                buf[0]
            )));
        }
        let transfer_id = decode_transfer_id(&buf[1..1 + TRANSFER_ID_LEN])?;
        let off = 1 + TRANSFER_ID_LEN;
        let resume_offset = u64::from_be_bytes([
            buf[off],
            buf[off + 1],
            buf[off + 2],
            buf[off + 3],
            buf[off + 4],
            buf[off + 5],
            buf[off + 6],
            buf[off + 7],
        ]);
        Ok(Self {
            transfer_id,
            resume_offset,
        })
    }
}

/// Encode the single-byte RESUME_ACK body.
#[must_use]
pub fn encode_resume_ack() -> Vec<u8> {
    vec![OPCODE_RESUME_ACK]
}

/// Validate a RESUME_ACK body.
///
/// # Errors
///
/// Returns `ProtocolError::InvalidBody` unless the body is exactly `[0x05]`.
pub fn decode_resume_ack(buf: &[u8]) -> Result<(), ProtocolError> {
    if buf == [OPCODE_RESUME_ACK] {
        Ok(())
    } else {
        Err(ProtocolError::InvalidBody(
            "malformed resume ack body".into(),
        ))
    }
}

/// Transfer completion notice.
///
/// The bare form is a single opcode byte. Senders that pre-encrypted the
/// file append the transfer id and an aggregate HMAC, which older peers may
/// omit; both forms must be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompleteMessage {
    /// Transfer id, present only in the extended form.
    pub transfer_id: Option<String>,
    /// Aggregate HMAC over the full ciphertext, present only in the
    /// extended form.
    pub aggregate_tag: Option<Vec<u8>>,
}

impl CompleteMessage {
    /// Bare completion notice without the HMAC extension.
    #[must_use]
    pub fn bare() -> Self {
        Self::default()
    }

    /// Extended completion notice carrying the aggregate HMAC.
    #[must_use]
    pub fn with_tag(transfer_id: String, tag: Vec<u8>) -> Self {
        Self {
            transfer_id: Some(transfer_id),
            aggregate_tag: Some(tag),
        }
    }

    /// Encode as a message body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` if only one of the extension
    /// fields is set or the tag exceeds `u16::MAX` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match (&self.transfer_id, &self.aggregate_tag) {
            (None, None) => Ok(vec![OPCODE_COMPLETE]),
            (Some(id), Some(tag)) => {
                if tag.len() > usize::from(u16::MAX) {
                    return Err(ProtocolError::InvalidBody("aggregate tag too long".into()));
                }
                let mut buf = vec![0u8; 1 + TRANSFER_ID_LEN + 2 + tag.len()];
                buf[0] = OPCODE_COMPLETE;
                encode_transfer_id(id, &mut buf[1..1 + TRANSFER_ID_LEN])?;
                let off = 1 + TRANSFER_ID_LEN;
                buf[off..off + 2].copy_from_slice(&(tag.len() as u16).to_be_bytes());
                buf[off + 2..].copy_from_slice(tag);
                Ok(buf)
            }
            _ => Err(ProtocolError::InvalidBody(
                "complete extension requires both transfer id and tag".into(),
            )),
        }
    }

    /// Decode from a message body, accepting both forms.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidBody` on a wrong opcode or a
    /// truncated extension.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.is_empty() || buf[0] != OPCODE_COMPLETE {
            return Err(ProtocolError::InvalidBody("malformed complete body".into()));
        }
        if buf.len() == 1 {
            return Ok(Self::bare());
        }
        if buf.len() < 1 + TRANSFER_ID_LEN + 2 {
            return Err(ProtocolError::InvalidBody(
                "truncated complete extension".into(),
            ));
        }
        let transfer_id = decode_transfer_id(&buf[1..1 + TRANSFER_ID_LEN])?;
        let off = 1 + TRANSFER_ID_LEN;
        let tag_len = u16::from_be_bytes([buf[off], buf[off + 1]]) as usize;
        if buf.len() != off + 2 + tag_len {
            return Err(ProtocolError::InvalidBody(format!(
                "complete tag length mismatch: declared {tag_len}, body has {}",
                buf.len() - off - 2
            )));
        }
        Ok(Self {
            transfer_id: Some(transfer_id),
            aggregate_tag: Some(buf[off + 2..].to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01234567-89ab-cdef-0123-456789abcdef";

    fn sample_metadata() -> FileMetadataMessage {
        FileMetadataMessage {
            transfer_id: ID.into(),
            file_name: "report.pdf".into(),
            file_size: 10 * 1024 * 1024,
            wire_size: 10 * 1024 * 1024,
            file_hash: "c".repeat(64),
            merkle_root: Some("d".repeat(64)),
            hash_algorithm: "sha-256".into(),
            compressed: false,
            encrypted: true,
            streamed: false,
            chunk_size: 1024 * 1024,
            session_salt: Some("00".repeat(16)),
            cipher_suite: Some("hybrid".into()),
            signature: None,
            signature_algorithm: None,
            signer_id: None,
        }
    }

    #[test]
    fn metadata_roundtrip() {
        let meta = sample_metadata();
        let decoded = FileMetadataMessage::decode(&meta.encode().unwrap()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn metadata_without_optional_fields_parses() {
        // A minimal peer may omit every optional field.
        let json = format!(
            r#"{{"transfer_id":"{ID}","file_name":"a.bin","file_size":1,
                "wire_size":1,"file_hash":"00","hash_algorithm":"sha-256",
                "compressed":false,"encrypted":false,"chunk_size":65536}}"#
        );
        let meta = FileMetadataMessage::decode(json.as_bytes()).unwrap();
        assert!(!meta.streamed);
        assert!(meta.merkle_root.is_none());
        assert!(meta.session_salt.is_none());
    }

    #[test]
    fn resume_request_roundtrip() {
        let req = ResumeRequest {
            transfer_id: ID.into(),
            resume_offset: 5 * 1024 * 1024,
        };
        let encoded = req.encode().unwrap();
        assert_eq!(encoded.len(), 45);
        assert_eq!(encoded[0], OPCODE_RESUME_REQUEST);
        assert_eq!(ResumeRequest::decode(&encoded).unwrap(), req);
    }

    #[test]
    fn resume_request_wrong_opcode_rejected() {
        let mut encoded = ResumeRequest {
            transfer_id: ID.into(),
            resume_offset: 0,
        }
        .encode()
        .unwrap();
        encoded[0] = 0x07;
        assert!(ResumeRequest::decode(&encoded).is_err());
    }

    #[test]
    fn resume_ack_roundtrip() {
        let body = encode_resume_ack();
        assert_eq!(body, vec![OPCODE_RESUME_ACK]);
        decode_resume_ack(&body).unwrap();
        assert!(decode_resume_ack(&[0x04]).is_err());
    }

    #[test]
    fn bare_complete_accepted() {
        let body = CompleteMessage::bare().encode().unwrap();
        assert_eq!(body, vec![OPCODE_COMPLETE]);
        let decoded = CompleteMessage::decode(&body).unwrap();
        assert!(decoded.aggregate_tag.is_none());
    }

    #[test]
    fn extended_complete_roundtrip() {
        let msg = CompleteMessage::with_tag(ID.into(), vec![0x11; 32]);
        let body = msg.encode().unwrap();
        assert_eq!(body.len(), 1 + 36 + 2 + 32);
        assert_eq!(CompleteMessage::decode(&body).unwrap(), msg);
    }

    #[test]
    fn truncated_complete_extension_rejected() {
        let msg = CompleteMessage::with_tag(ID.into(), vec![0x11; 32]);
        let body = msg.encode().unwrap();
        assert!(CompleteMessage::decode(&body[..body.len() - 1]).is_err());
    }
}
