//! Transfer session state machine.
//!
//! `preparing → transferring ⇄ paused → {completed | failed | cancelled}`.
//! The active chunk loop calls [`TransferSession::checkpoint`] at each chunk
//! boundary: it sleeps while paused and raises `Cancelled` once a cancel has
//! been requested, so state changes never interrupt a chunk mid-flight.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SPEED_SAMPLES: usize = 10;

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Created, metadata exchange not yet finished.
    Preparing,
    /// Waiting for a queue slot.
    Queued,
    /// Actively exchanging chunks.
    Transferring,
    /// Suspended by the user or the queue.
    Paused,
    /// All chunks exchanged and verified.
    Completed,
    /// Terminal failure; `last_error` holds the reason.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl TransferState {
    /// Sort rank for queue listings: active first, terminal last.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            TransferState::Transferring => 0,
            TransferState::Preparing | TransferState::Queued => 1,
            TransferState::Paused => 2,
            TransferState::Failed => 3,
            TransferState::Completed => 4,
            TransferState::Cancelled => 5,
        }
    }

    /// Whether no further transitions are allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }
}

/// Which side of the wire this session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Local file going out.
    Send,
    /// Remote file coming in.
    Receive,
}

struct SpeedRing {
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedRing {
    fn record(&mut self, bytes: u64) {
        if self.samples.len() == SPEED_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back((Instant::now(), bytes));
    }

    fn bytes_per_second(&self) -> f64 {
        let (Some((first, _)), Some((last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = last.duration_since(*first).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        let total: u64 = self.samples.iter().skip(1).map(|(_, b)| b).sum();
        total as f64 / elapsed
    }
}

struct SessionInner {
    id: String,
    direction: Direction,
    state: Mutex<TransferState>,
    bytes_transferred: AtomicU64,
    total_bytes: AtomicU64,
    last_error: Mutex<Option<String>>,
    speed: Mutex<SpeedRing>,
}

/// Cheaply cloneable handle to one transfer's live state.
///
/// The chunk loop owns the session's progress; the queue and UI observe and
/// flip its state through this handle.
#[derive(Clone)]
pub struct TransferSession {
    inner: Arc<SessionInner>,
}

impl TransferSession {
    /// New session in `Preparing`.
    #[must_use]
    pub fn new(id: impl Into<String>, direction: Direction) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                direction,
                state: Mutex::new(TransferState::Preparing),
                bytes_transferred: AtomicU64::new(0),
                total_bytes: AtomicU64::new(0),
                last_error: Mutex::new(None),
                speed: Mutex::new(SpeedRing {
                    samples: VecDeque::with_capacity(SPEED_SAMPLES),
                }),
            }),
        }
    }

    /// Transfer id this session drives.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Direction of the transfer.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `to`, rejecting transitions out of a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Protocol` when the current state is terminal.
    pub fn transition(&self, to: TransferState) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_terminal() {
            return Err(EngineError::Protocol(format!(
                "transfer {} already {:?}",
                self.inner.id, *state
            )));
        }
        tracing::debug!(id = %self.inner.id, from = ?*state, to = ?to, "session transition");
        *state = to;
        Ok(())
    }

    /// Request a pause; takes effect at the next chunk boundary.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Protocol` for terminal sessions.
    pub fn pause(&self) -> Result<()> {
        self.transition(TransferState::Paused)
    }

    /// Resume a paused session.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Protocol` for terminal sessions.
    pub fn resume(&self) -> Result<()> {
        self.transition(TransferState::Transferring)
    }

    /// Request cancellation; the chunk loop observes it at the next
    /// boundary. Idempotent, allowed from any state.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.is_terminal() {
            *state = TransferState::Cancelled;
        }
    }

    /// Record a failure reason.
    pub fn fail(&self, error: &EngineError) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.is_terminal() {
            *state = TransferState::Failed;
        }
    }

    /// Last failure text, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Declare the total byte count once it is known.
    pub fn set_total_bytes(&self, total: u64) {
        self.inner.total_bytes.store(total, Ordering::Relaxed);
    }

    /// Account for bytes placed on (or taken off) the wire.
    pub fn record_bytes(&self, bytes: u64) {
        self.inner.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        self.inner
            .speed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(bytes);
    }

    /// Bytes transferred so far.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.inner.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Declared total bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.inner.total_bytes.load(Ordering::Relaxed)
    }

    /// Fraction complete, 0.0 to 1.0.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        (self.bytes_transferred() as f64 / total as f64).min(1.0)
    }

    /// Recent transfer rate in bytes per second, averaged over the last
    /// few chunk acknowledgements.
    #[must_use]
    pub fn bytes_per_second(&self) -> f64 {
        self.inner
            .speed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .bytes_per_second()
    }

    /// Chunk-boundary poll: sleeps while paused, raises on cancellation.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Cancelled` once cancellation was requested.
    pub async fn checkpoint(&self) -> Result<()> {
        loop {
            match self.state() {
                TransferState::Cancelled => return Err(EngineError::Cancelled),
                TransferState::Paused => tokio::time::sleep(PAUSE_POLL_INTERVAL).await,
                _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ranks_order_active_before_terminal() {
        assert!(TransferState::Transferring.rank() < TransferState::Queued.rank());
        assert!(TransferState::Queued.rank() < TransferState::Paused.rank());
        assert!(TransferState::Paused.rank() < TransferState::Failed.rank());
        assert!(TransferState::Failed.rank() < TransferState::Completed.rank());
        assert!(TransferState::Completed.rank() < TransferState::Cancelled.rank());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let session = TransferSession::new("t1", Direction::Send);
        session.transition(TransferState::Transferring).unwrap();
        session.transition(TransferState::Completed).unwrap();
        assert!(session.transition(TransferState::Transferring).is_err());
        assert!(session.pause().is_err());
    }

    #[test]
    fn cancel_is_idempotent_and_sticky() {
        let session = TransferSession::new("t1", Direction::Receive);
        session.cancel();
        session.cancel();
        assert_eq!(session.state(), TransferState::Cancelled);

        // A later failure must not overwrite the cancellation.
        session.fail(&EngineError::Network("late".into()));
        assert_eq!(session.state(), TransferState::Cancelled);
    }

    #[test]
    fn progress_tracks_bytes() {
        let session = TransferSession::new("t1", Direction::Send);
        session.set_total_bytes(1000);
        assert_eq!(session.progress(), 0.0);
        session.record_bytes(250);
        assert!((session.progress() - 0.25).abs() < f64::EPSILON);
        session.record_bytes(750);
        assert_eq!(session.progress(), 1.0);
    }

    #[tokio::test]
    async fn checkpoint_raises_on_cancel() {
        let session = TransferSession::new("t1", Direction::Send);
        session.transition(TransferState::Transferring).unwrap();
        session.checkpoint().await.unwrap();
        session.cancel();
        assert!(matches!(
            session.checkpoint().await,
            Err(EngineError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_sleeps_while_paused_then_resumes() {
        let session = TransferSession::new("t1", Direction::Send);
        session.transition(TransferState::Transferring).unwrap();
        session.pause().unwrap();

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.checkpoint().await })
        };
        tokio::time::sleep(Duration::from_millis(350)).await;
        session.resume().unwrap();
        waiter.await.unwrap().unwrap();
    }
}
