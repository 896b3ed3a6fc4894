//! Resumable transfer queue.
//!
//! A periodic one-second tick promotes queued entries while fewer than
//! `max_concurrent` transfers are active, highest priority and oldest first.
//! Every state transition is persisted through [`QueueStore`] before the
//! tick moves on, so a crash loses at most the chunk in flight.

use crate::error::{EngineError, Result};
use crate::persist::QueueStore;
use crate::retry::RetryPolicy;
use crate::session::{Direction, TransferSession, TransferState};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use trestle_proto::FileMetadataMessage;
use uuid::Uuid;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Scheduling priority. Higher sorts earlier within the queued set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TransferPriority {
    /// Background transfers.
    Low,
    /// Default.
    Normal,
    /// Jump the queue.
    High,
    /// Scheduled ahead of everything else, including high.
    Urgent,
}

/// One durable queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumableTransfer {
    /// Transfer id, shared with the wire protocol.
    pub id: String,
    /// Destination peer identifier.
    pub peer: String,
    /// Source file on the local disk.
    pub file_path: PathBuf,
    /// Scheduling priority.
    pub priority: TransferPriority,
    /// Current lifecycle state.
    pub state: TransferState,
    /// Wire bytes acknowledged so far.
    pub bytes_transferred: u64,
    /// Declared wire size, once known.
    pub total_bytes: u64,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Enqueue time, unix millis. Older entries win ties.
    pub queued_at_ms: u64,
    /// Earliest time the next attempt may start, unix millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at_ms: Option<u64>,
    /// Last failure text, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Metadata from the first attempt; enables resume instead of restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadataMessage>,
}

impl ResumableTransfer {
    /// Wire offset a retry should resume from: acknowledged bytes floored
    /// to a chunk boundary. Zero (full restart) when no metadata is known.
    #[must_use]
    pub fn resume_offset(&self) -> u64 {
        match &self.metadata {
            Some(m) if m.chunk_size > 0 => {
                (self.bytes_transferred / m.chunk_size) * m.chunk_size
            }
            _ => 0,
        }
    }
}

/// Outcome of one launch attempt.
pub struct LaunchOutcome {
    /// Metadata negotiated with the peer, if the attempt got that far.
    /// Persisted so a retry can resume instead of restarting.
    pub metadata: Option<FileMetadataMessage>,
    /// Final result of the attempt.
    pub result: Result<()>,
}

/// Runs one transfer attempt. The queue owns scheduling and persistence;
/// implementations own connecting and driving the wire exchange.
#[async_trait]
pub trait TransferLauncher: Send + Sync {
    /// Execute `entry` end to end, reporting progress through `session`.
    async fn launch(&self, entry: ResumableTransfer, session: TransferSession) -> LaunchOutcome;
}

/// Counts by state for display.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusSummary {
    /// Entries waiting for a slot (including preparing).
    pub queued: usize,
    /// Entries actively exchanging chunks.
    pub transferring: usize,
    /// Entries paused by the user.
    pub paused: usize,
    /// Entries finished successfully.
    pub completed: usize,
    /// Entries permanently failed.
    pub failed: usize,
    /// Entries cancelled by the user.
    pub cancelled: usize,
}

impl StatusSummary {
    /// Total entry count.
    #[must_use]
    pub fn total(&self) -> usize {
        self.queued + self.transferring + self.paused + self.completed + self.failed
            + self.cancelled
    }
}

struct QueueInner {
    entries: Mutex<HashMap<String, ResumableTransfer>>,
    sessions: DashMap<String, TransferSession>,
    store: QueueStore,
    launcher: Arc<dyn TransferLauncher>,
    retry: RetryPolicy,
    max_concurrent: usize,
}

impl QueueInner {
    fn persist(&self, entries: &HashMap<String, ResumableTransfer>) {
        let mut sorted: Vec<&ResumableTransfer> = entries.values().collect();
        sorted.sort_by_key(|e| e.queued_at_ms);
        if let Err(e) = self.store.save(&sorted) {
            tracing::error!(error = %e, "failed to persist queue snapshot");
        }
    }
}

/// Schedules, persists, and supervises transfers.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl QueueManager {
    /// Manager over a snapshot store. Entries persisted mid-transfer by a
    /// previous process are demoted to queued, forcing offset
    /// re-negotiation before any chunk moves.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` if the snapshot cannot be loaded.
    pub fn new(
        store: QueueStore,
        launcher: Arc<dyn TransferLauncher>,
        retry: RetryPolicy,
        max_concurrent: usize,
    ) -> Result<Self> {
        let mut entries = HashMap::new();
        for mut entry in store.load()? {
            if matches!(
                entry.state,
                TransferState::Transferring | TransferState::Preparing
            ) {
                tracing::info!(id = %entry.id, "demoting in-flight entry to queued after restart");
                entry.state = TransferState::Queued;
            }
            entries.insert(entry.id.clone(), entry);
        }

        Ok(Self {
            inner: Arc::new(QueueInner {
                entries: Mutex::new(entries),
                sessions: DashMap::new(),
                store,
                launcher,
                retry,
                max_concurrent,
            }),
        })
    }

    /// Add a transfer and persist the snapshot. Returns the new id.
    pub async fn enqueue(
        &self,
        peer: impl Into<String>,
        file_path: impl Into<PathBuf>,
        priority: TransferPriority,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = ResumableTransfer {
            id: id.clone(),
            peer: peer.into(),
            file_path: file_path.into(),
            priority,
            state: TransferState::Queued,
            bytes_transferred: 0,
            total_bytes: 0,
            retry_count: 0,
            queued_at_ms: unix_millis(),
            next_attempt_at_ms: None,
            last_error: None,
            metadata: None,
        };

        let mut entries = self.inner.entries.lock().await;
        entries.insert(id.clone(), entry);
        self.inner.persist(&entries);
        tracing::info!(id = %id, "transfer enqueued");
        id
    }

    /// Pause a queued or active transfer.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` for unknown ids or
    /// `EngineError::Protocol` for terminal entries.
    pub async fn pause(&self, id: &str) -> Result<()> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::Resource(format!("unknown transfer {id}")))?;
        if entry.state.is_terminal() {
            return Err(EngineError::Protocol(format!(
                "transfer {id} already {:?}",
                entry.state
            )));
        }

        if let Some(session) = self.inner.sessions.get(id) {
            session.pause()?;
        }
        entry.state = TransferState::Paused;
        self.inner.persist(&entries);
        Ok(())
    }

    /// Resume a paused transfer: in place if its session is still live,
    /// otherwise back into the queued set.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` for unknown ids or
    /// `EngineError::Protocol` if the entry is not paused.
    pub async fn resume(&self, id: &str) -> Result<()> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::Resource(format!("unknown transfer {id}")))?;
        if entry.state != TransferState::Paused {
            return Err(EngineError::Protocol(format!(
                "transfer {id} is {:?}, not paused",
                entry.state
            )));
        }

        if let Some(session) = self.inner.sessions.get(id) {
            session.resume()?;
            entry.state = TransferState::Transferring;
        } else {
            entry.state = TransferState::Queued;
        }
        self.inner.persist(&entries);
        Ok(())
    }

    /// Cancel a transfer. Takes effect at the next chunk boundary when the
    /// transfer is live. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` for unknown ids.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::Resource(format!("unknown transfer {id}")))?;

        if let Some(session) = self.inner.sessions.get(id) {
            session.cancel();
        }
        if !entry.state.is_terminal() {
            entry.state = TransferState::Cancelled;
        }
        self.inner.persist(&entries);
        Ok(())
    }

    /// Replay a permanently failed transfer. Never happens automatically.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` for unknown ids or
    /// `EngineError::Protocol` if the entry is not failed.
    pub async fn retry(&self, id: &str) -> Result<()> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::Resource(format!("unknown transfer {id}")))?;
        if entry.state != TransferState::Failed {
            return Err(EngineError::Protocol(format!(
                "transfer {id} is {:?}, not failed",
                entry.state
            )));
        }

        entry.state = TransferState::Queued;
        entry.retry_count = 0;
        entry.next_attempt_at_ms = None;
        self.inner.persist(&entries);
        Ok(())
    }

    /// Change an entry's priority.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Resource` for unknown ids.
    pub async fn set_priority(&self, id: &str, priority: TransferPriority) -> Result<()> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::Resource(format!("unknown transfer {id}")))?;
        entry.priority = priority;
        self.inner.persist(&entries);
        Ok(())
    }

    /// Counts by state.
    pub async fn status_summary(&self) -> StatusSummary {
        let entries = self.inner.entries.lock().await;
        let mut summary = StatusSummary::default();
        for entry in entries.values() {
            match entry.state {
                TransferState::Preparing | TransferState::Queued => summary.queued += 1,
                TransferState::Transferring => summary.transferring += 1,
                TransferState::Paused => summary.paused += 1,
                TransferState::Completed => summary.completed += 1,
                TransferState::Failed => summary.failed += 1,
                TransferState::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// All entries in display order: state rank, then priority descending,
    /// then enqueue time ascending.
    pub async fn entries_sorted(&self) -> Vec<ResumableTransfer> {
        let entries = self.inner.entries.lock().await;
        let mut list: Vec<ResumableTransfer> = entries.values().cloned().collect();
        list.sort_by_key(|e| (e.state.rank(), Reverse(e.priority), e.queued_at_ms));
        list
    }

    /// Snapshot of one entry.
    pub async fn entry(&self, id: &str) -> Option<ResumableTransfer> {
        self.inner.entries.lock().await.get(id).cloned()
    }

    /// Live session handle for an active transfer.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<TransferSession> {
        self.inner.sessions.get(id).map(|s| s.clone())
    }

    /// One scheduling pass: promote eligible queued entries while capacity
    /// remains. Called by the scheduler task every second; also callable
    /// directly from tests.
    pub async fn tick(&self) {
        let mut entries = self.inner.entries.lock().await;
        let active = self.inner.sessions.len();
        if active >= self.inner.max_concurrent {
            return;
        }

        let now = unix_millis();
        let mut eligible: Vec<(TransferPriority, u64, String)> = entries
            .values()
            .filter(|e| {
                e.state == TransferState::Queued
                    && e.next_attempt_at_ms.map_or(true, |t| t <= now)
            })
            .map(|e| (e.priority, e.queued_at_ms, e.id.clone()))
            .collect();
        eligible.sort_by_key(|(priority, queued_at, _)| (Reverse(*priority), *queued_at));

        let slots = self.inner.max_concurrent - active;
        let mut promoted = false;
        for (_, _, id) in eligible.into_iter().take(slots) {
            let Some(entry) = entries.get_mut(&id) else {
                continue;
            };
            entry.state = TransferState::Transferring;
            promoted = true;

            let session = TransferSession::new(entry.id.clone(), Direction::Send);
            session.transition(TransferState::Transferring).ok();
            self.inner.sessions.insert(entry.id.clone(), session.clone());

            tracing::info!(id = %entry.id, attempt = entry.retry_count, "transfer started");
            tokio::spawn(run_transfer(
                Arc::clone(&self.inner),
                entry.clone(),
                session,
            ));
        }

        if promoted {
            self.inner.persist(&entries);
        }
    }

    /// Spawn the periodic scheduler. The task runs until aborted.
    #[must_use]
    pub fn spawn_scheduler(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                queue.tick().await;
            }
        })
    }
}

/// Supervises one attempt: runs the launcher, then applies the outcome to
/// the durable entry (completion, cancellation, scheduled retry, or
/// permanent failure).
async fn run_transfer(
    inner: Arc<QueueInner>,
    entry: ResumableTransfer,
    session: TransferSession,
) {
    let id = entry.id.clone();
    let outcome = inner.launcher.launch(entry, session.clone()).await;

    let mut entries = inner.entries.lock().await;
    inner.sessions.remove(&id);
    let Some(entry) = entries.get_mut(&id) else {
        return;
    };

    entry.bytes_transferred = session.bytes_transferred();
    entry.total_bytes = session.total_bytes();
    if let Some(metadata) = outcome.metadata {
        entry.metadata = Some(metadata);
    }

    match outcome.result {
        Ok(()) => {
            entry.state = TransferState::Completed;
            entry.last_error = None;
            tracing::info!(id = %id, "transfer completed");
        }
        Err(EngineError::Cancelled) => {
            entry.state = TransferState::Cancelled;
            tracing::info!(id = %id, "transfer cancelled");
        }
        Err(e) if e.is_retriable() && entry.retry_count < inner.retry.max_attempts => {
            let delay = inner.retry.delay_for_attempt(entry.retry_count);
            entry.retry_count += 1;
            entry.state = TransferState::Queued;
            entry.last_error = Some(e.to_string());
            entry.next_attempt_at_ms = Some(unix_millis() + delay.as_millis() as u64);
            tracing::warn!(
                id = %id,
                attempt = entry.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "transfer failed, retry scheduled"
            );
        }
        Err(e) => {
            entry.state = TransferState::Failed;
            entry.last_error = Some(e.to_string());
            tracing::error!(id = %id, error = %e, "transfer failed permanently");
        }
    }

    inner.persist(&entries);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_urgent_first() {
        assert!(TransferPriority::Urgent > TransferPriority::High);
        assert!(TransferPriority::High > TransferPriority::Normal);
        assert!(TransferPriority::Normal > TransferPriority::Low);
    }

    #[test]
    fn resume_offset_floors_to_chunk_boundary() {
        let mut entry = ResumableTransfer {
            id: "t".into(),
            peer: "p".into(),
            file_path: "/tmp/f".into(),
            priority: TransferPriority::Normal,
            state: TransferState::Queued,
            bytes_transferred: 2_500_000,
            total_bytes: 10_000_000,
            retry_count: 0,
            queued_at_ms: 0,
            next_attempt_at_ms: None,
            last_error: None,
            metadata: None,
        };
        assert_eq!(entry.resume_offset(), 0);

        entry.metadata = Some(FileMetadataMessage {
            transfer_id: "t".into(),
            file_name: "f".into(),
            file_size: 10_000_000,
            wire_size: 10_000_000,
            file_hash: "00".into(),
            merkle_root: None,
            hash_algorithm: "sha-256".into(),
            compressed: false,
            encrypted: false,
            streamed: false,
            chunk_size: 1_000_000,
            session_salt: None,
            cipher_suite: None,
            signature: None,
            signature_algorithm: None,
            signer_id: None,
        });
        assert_eq!(entry.resume_offset(), 2_000_000);
    }
}
