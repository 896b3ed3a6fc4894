//! Durable queue state.
//!
//! The whole queue is rewritten as one JSON snapshot on every mutation,
//! written to a sibling temp file and renamed into place so a crash never
//! leaves a torn file. On reload, entries caught mid-transfer are demoted
//! to queued by the manager, which forces offset re-negotiation.

use crate::error::{EngineError, Result};
use crate::queue::ResumableTransfer;
use std::path::PathBuf;

/// Atomic JSON snapshot store for queue entries.
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    /// Store backed by `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Rewrite the snapshot atomically.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` if the snapshot cannot be written.
    pub fn save(&self, entries: &[&ResumableTransfer]) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| EngineError::Resource(format!("queue serialization: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| EngineError::Resource(format!("queue snapshot write: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| EngineError::Resource(format!("queue snapshot rename: {e}")))?;
        tracing::trace!(path = %self.path.display(), entries = entries.len(), "queue persisted");
        Ok(())
    }

    /// Load the snapshot. A missing file is an empty queue.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` on unreadable or malformed snapshots.
    pub fn load(&self) -> Result<Vec<ResumableTransfer>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::Resource(format!("queue snapshot read: {e}")));
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Resource(format!("queue snapshot parse: {e}")))
    }
}
