//! CLI configuration file.
//!
//! Lives at `~/.config/trestle/config.toml` by default. Every field has a
//! default so a missing file just means defaults.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trestle_engine::{TransferConfig, LARGE_FILE_THRESHOLD};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transfer: TransferSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Chunk size in bytes.
    pub chunk_size: usize,
    /// Compress chunks before encryption.
    pub compress: bool,
    /// Encrypt transfers.
    pub encrypt: bool,
    /// Size in bytes above which encrypted files stream-encrypt up front.
    pub large_file_threshold: u64,
    /// Maximum send rate in bytes per second. Zero means unlimited.
    pub max_transfer_speed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory holding per-peer key files. Empty means the default under
    /// the config directory.
    pub key_dir: PathBuf,
    /// Default output directory for received files. Empty means the
    /// current directory.
    pub download_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfer: TransferSection::default(),
            storage: StorageSection::default(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        let defaults = TransferConfig::default();
        Self {
            chunk_size: defaults.chunk_size,
            compress: defaults.compress,
            encrypt: defaults.encrypt,
            large_file_threshold: LARGE_FILE_THRESHOLD,
            max_transfer_speed: 0,
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::new(),
            download_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trestle")
            .join("config.toml")
    }

    /// Load from an explicit path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load the default config file, falling back to defaults if absent.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Where per-peer key files live.
    pub fn key_dir(&self) -> PathBuf {
        if self.storage.key_dir.as_os_str().is_empty() {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("trestle")
                .join("keys")
        } else {
            self.storage.key_dir.clone()
        }
    }

    /// Where the queue snapshot is persisted.
    pub fn queue_path(&self) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trestle")
            .join("queue.json")
    }

    /// Default download directory.
    pub fn download_dir(&self) -> PathBuf {
        if self.storage.download_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            self.storage.download_dir.clone()
        }
    }

    /// Build the engine configuration from the file plus CLI overrides.
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.transfer.chunk_size,
            compress: self.transfer.compress,
            encrypt: self.transfer.encrypt,
            sign: false,
            large_file_threshold: self.transfer.large_file_threshold,
            max_transfer_speed: self.transfer.max_transfer_speed,
        }
    }
}
