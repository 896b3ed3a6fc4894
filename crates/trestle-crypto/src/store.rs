//! Key store collaborator interface.
//!
//! The secure store that holds per-peer master keys is provided by the host
//! platform (keychain, TPM-backed store). This module defines the narrow
//! `get/set` interface the key manager consumes, plus a file-backed
//! implementation for headless deployments and an in-memory one for tests.

use crate::error::CryptoError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Narrow persistence interface for key material.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch the bytes stored under `identifier`, if any.
    async fn get(&self, identifier: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Store `bytes` under `identifier`, replacing any previous value.
    async fn set(&self, identifier: &str, bytes: &[u8]) -> Result<(), CryptoError>;
}

/// In-memory key store for tests and ephemeral peers.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, identifier: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self.entries.lock().await.get(identifier).cloned())
    }

    async fn set(&self, identifier: &str, bytes: &[u8]) -> Result<(), CryptoError> {
        self.entries
            .lock()
            .await
            .insert(identifier.to_owned(), bytes.to_vec());
        Ok(())
    }
}

/// File-backed key store: one hex-encoded file per identifier.
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Store` if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CryptoError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CryptoError::Store(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        // Identifiers come from peer ids; flatten anything path-like.
        let safe: String = identifier
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.key"))
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn get(&self, identifier: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let path = self.path_for(identifier);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => hex::decode(contents.trim())
                .map(Some)
                .map_err(|e| CryptoError::Store(format!("corrupt key file {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CryptoError::Store(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set(&self, identifier: &str, bytes: &[u8]) -> Result<(), CryptoError> {
        let path = self.path_for(identifier);
        tokio::fs::write(&path, hex::encode(bytes))
            .await
            .map_err(|e| CryptoError::Store(format!("write {}: {e}", path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)
                .map_err(|e| CryptoError::Store(format!("chmod {}: {e}", path.display())))?;
        }

        Ok(())
    }
}
