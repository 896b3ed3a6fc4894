//! Wire header encoding and decoding (8 bytes).
//!
//! Every message starts with a fixed 8-byte header:
//!
//! ```text
//!  Offset  Size  Field
//!  0       4     Message Type (big-endian u32)
//!  4       4     Body Length (big-endian u32)
//! ```

use crate::error::ProtocolError;

/// Size of the fixed wire header in bytes.
pub const WIRE_HEADER_SIZE: usize = 8;

/// Maximum accepted body length (64 MiB). Guards against hostile headers
/// declaring absurd lengths before any allocation happens.
pub const MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// Protocol message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// File metadata, sent once per transfer before any chunk.
    Metadata = 1,
    /// A single chunk of file data.
    Chunk = 2,
    /// Transfer complete, optionally carrying an aggregate HMAC.
    Complete = 3,
    /// Request to resume an interrupted transfer at a byte offset.
    ResumeRequest = 4,
    /// Acknowledgement of a resume request.
    ResumeAck = 5,
}

impl MessageType {
    /// Numeric wire identifier.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Metadata),
            2 => Ok(Self::Chunk),
            3 => Ok(Self::Complete),
            4 => Ok(Self::ResumeRequest),
            5 => Ok(Self::ResumeAck),
            other => Err(ProtocolError::InvalidHeader(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

/// Fixed 8-byte header preceding every message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    /// Message type of the body that follows.
    pub message_type: MessageType,
    /// Declared body length in bytes.
    pub length: u32,
}

impl WireHeader {
    /// Create a header for a body of the given length.
    #[must_use]
    pub fn new(message_type: MessageType, length: u32) -> Self {
        Self {
            message_type,
            length,
        }
    }

    /// Encode the header into an 8-byte buffer.
    #[must_use]
    pub fn encode(&self) -> [u8; WIRE_HEADER_SIZE] {
        let mut buf = [0u8; WIRE_HEADER_SIZE];
        buf[..4].copy_from_slice(&self.message_type.to_u32().to_be_bytes());
        buf[4..].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode a header from a byte buffer.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidHeader` if the buffer is shorter than
    /// 8 bytes, the type is unknown, or the declared length exceeds
    /// [`MAX_BODY_SIZE`].
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < WIRE_HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader(format!(
                "header too short: {} bytes",
                buf.len()
            )));
        }

        let raw_type = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if length > MAX_BODY_SIZE {
            return Err(ProtocolError::InvalidHeader(format!(
                "declared body length {length} exceeds maximum {MAX_BODY_SIZE}"
            )));
        }

        Ok(Self {
            message_type: MessageType::try_from(raw_type)?,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = WireHeader::new(MessageType::Chunk, 1024);
        let encoded = header.encode();
        assert_eq!(encoded.len(), WIRE_HEADER_SIZE);
        let decoded = WireHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_is_big_endian() {
        let header = WireHeader::new(MessageType::Metadata, 0x0102_0304);
        let encoded = header.encode();
        assert_eq!(&encoded[..4], &[0, 0, 0, 1]);
        assert_eq!(&encoded[4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn unknown_type_rejected() {
        let mut buf = WireHeader::new(MessageType::Chunk, 4).encode();
        buf[3] = 0xFF;
        let err = WireHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeader(_)));
    }

    #[test]
    fn short_buffer_rejected() {
        let err = WireHeader::decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeader(_)));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = [0u8; 8];
        buf[3] = 2;
        buf[4..].copy_from_slice(&(MAX_BODY_SIZE + 1).to_be_bytes());
        let err = WireHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeader(_)));
    }

    #[test]
    fn all_message_types_roundtrip() {
        for mt in [
            MessageType::Metadata,
            MessageType::Chunk,
            MessageType::Complete,
            MessageType::ResumeRequest,
            MessageType::ResumeAck,
        ] {
            assert_eq!(MessageType::try_from(mt.to_u32()).unwrap(), mt);
        }
    }
}
