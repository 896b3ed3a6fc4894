//! Per-transfer configuration.

use crate::error::{EngineError, Result};
use trestle_files::{DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Files larger than this are pre-encrypted as a whole by the streaming
/// encryptor instead of per-chunk AEAD (32 MiB).
pub const LARGE_FILE_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Knobs for a single transfer.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes. Must be at least 64 KiB.
    pub chunk_size: usize,
    /// Compress chunks before encryption. Ignored for streamed transfers.
    pub compress: bool,
    /// Encrypt the payload.
    pub encrypt: bool,
    /// Sign the whole-file hash when a signer is configured.
    pub sign: bool,
    /// Size above which encrypted files switch to streamed mode.
    pub large_file_threshold: u64,
    /// Maximum send rate in bytes per second. Zero means unlimited.
    pub max_transfer_speed: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compress: false,
            encrypt: true,
            sign: false,
            large_file_threshold: LARGE_FILE_THRESHOLD,
            max_transfer_speed: 0,
        }
    }
}

impl TransferConfig {
    /// Check invariants before a transfer starts.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the chunk size is below 64 KiB or
    /// the streaming threshold is smaller than the chunk size.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(EngineError::Config(format!(
                "chunk size {} below minimum {MIN_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.large_file_threshold < self.chunk_size as u64 {
            return Err(EngineError::Config(
                "large-file threshold smaller than chunk size".into(),
            ));
        }
        Ok(())
    }

    /// Whether a file of `size` bytes takes the streamed-encryption path.
    #[must_use]
    pub fn is_streamed(&self, size: u64) -> bool {
        self.encrypt && size > self.large_file_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TransferConfig::default().validate().unwrap();
    }

    #[test]
    fn undersized_chunk_rejected() {
        let config = TransferConfig {
            chunk_size: 4096,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn streamed_only_when_encrypted_and_large() {
        let config = TransferConfig::default();
        assert!(config.is_streamed(LARGE_FILE_THRESHOLD + 1));
        assert!(!config.is_streamed(LARGE_FILE_THRESHOLD));

        let plain = TransferConfig {
            encrypt: false,
            ..Default::default()
        };
        assert!(!plain.is_streamed(u64::MAX));
    }
}
