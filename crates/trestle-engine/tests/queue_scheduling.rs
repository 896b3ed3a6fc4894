//! Queue manager scheduling behavior with a scripted launcher.
//!
//! Covers the concurrency bound, retry scheduling for network failures,
//! permanent failure for integrity errors, manual retry, pause semantics,
//! and snapshot reload after a simulated restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use trestle_engine::{
    EngineError, LaunchOutcome, QueueManager, QueueStore, ResumableTransfer, RetryPolicy,
    TransferLauncher, TransferPriority, TransferSession, TransferState,
};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        backoff_multiplier: 1.0,
        max_delay: Duration::from_millis(10),
        jitter_factor: 0.0,
    }
}

/// Launcher that sleeps briefly and records how many launches overlapped.
struct CountingLauncher {
    active: AtomicUsize,
    max_seen: AtomicUsize,
    launched: AtomicUsize,
}

impl CountingLauncher {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            launched: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TransferLauncher for CountingLauncher {
    async fn launch(&self, _entry: ResumableTransfer, _session: TransferSession) -> LaunchOutcome {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.launched.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        LaunchOutcome {
            metadata: None,
            result: Ok(()),
        }
    }
}

/// Launcher that fails a fixed number of times per transfer, then succeeds.
struct FlakyLauncher {
    failures_left: Mutex<HashMap<String, u32>>,
    error: fn() -> EngineError,
}

impl FlakyLauncher {
    fn new(error: fn() -> EngineError) -> Self {
        Self {
            failures_left: Mutex::new(HashMap::new()),
            error,
        }
    }

    fn script(&self, id: &str, failures: u32) {
        self.failures_left.lock().unwrap().insert(id.into(), failures);
    }
}

#[async_trait]
impl TransferLauncher for FlakyLauncher {
    async fn launch(&self, entry: ResumableTransfer, _session: TransferSession) -> LaunchOutcome {
        let mut scripted = self.failures_left.lock().unwrap();
        let left = scripted.entry(entry.id.clone()).or_insert(0);
        let result = if *left > 0 {
            *left -= 1;
            Err((self.error)())
        } else {
            Ok(())
        };
        LaunchOutcome {
            metadata: None,
            result,
        }
    }
}

async fn wait_for_state(queue: &QueueManager, id: &str, state: TransferState) {
    for _ in 0..200 {
        if queue.entry(id).await.map(|e| e.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "transfer {id} never reached {state:?}, currently {:?}",
        queue.entry(id).await.map(|e| e.state)
    );
}

fn store_in(dir: &TempDir) -> QueueStore {
    QueueStore::new(dir.path().join("queue.json"))
}

#[tokio::test]
async fn concurrent_transfers_never_exceed_limit() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::new());
    let queue = QueueManager::new(
        store_in(&dir),
        Arc::clone(&launcher) as Arc<dyn TransferLauncher>,
        fast_retry(0),
        2,
    )
    .unwrap();

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            queue
                .enqueue("peer", format!("/tmp/file-{i}"), TransferPriority::Normal)
                .await,
        );
    }

    for _ in 0..60 {
        queue.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        if launcher.launched.load(Ordering::SeqCst) == 6 {
            break;
        }
    }

    for id in &ids {
        wait_for_state(&queue, id, TransferState::Completed).await;
    }
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 6);
    assert!(launcher.max_seen.load(Ordering::SeqCst) <= 2);

    let summary = queue.status_summary().await;
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.total(), 6);
}

#[tokio::test]
async fn network_failures_retry_until_success() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(FlakyLauncher::new(|| {
        EngineError::Network("connection reset".into())
    }));
    let queue = QueueManager::new(
        store_in(&dir),
        Arc::clone(&launcher) as Arc<dyn TransferLauncher>,
        fast_retry(3),
        1,
    )
    .unwrap();

    let id = queue
        .enqueue("peer", "/tmp/flaky", TransferPriority::Normal)
        .await;
    launcher.script(&id, 2);

    for _ in 0..200 {
        queue.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        if queue.entry(&id).await.unwrap().state == TransferState::Completed {
            break;
        }
    }

    let entry = queue.entry(&id).await.unwrap();
    assert_eq!(entry.state, TransferState::Completed);
    assert_eq!(entry.retry_count, 2);
}

#[tokio::test]
async fn retries_exhaust_into_permanent_failure() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(FlakyLauncher::new(|| {
        EngineError::Network("peer unreachable".into())
    }));
    let queue = QueueManager::new(
        store_in(&dir),
        Arc::clone(&launcher) as Arc<dyn TransferLauncher>,
        fast_retry(2),
        1,
    )
    .unwrap();

    let id = queue
        .enqueue("peer", "/tmp/doomed", TransferPriority::Normal)
        .await;
    launcher.script(&id, 10);

    for _ in 0..200 {
        queue.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        if queue.entry(&id).await.unwrap().state == TransferState::Failed {
            break;
        }
    }

    let entry = queue.entry(&id).await.unwrap();
    assert_eq!(entry.state, TransferState::Failed);
    // First attempt plus two automatic retries.
    assert_eq!(entry.retry_count, 2);
    assert!(entry.last_error.as_deref().unwrap().contains("unreachable"));

    // A manual retry resets the counter and requeues.
    queue.retry(&id).await.unwrap();
    let entry = queue.entry(&id).await.unwrap();
    assert_eq!(entry.state, TransferState::Queued);
    assert_eq!(entry.retry_count, 0);
}

#[tokio::test]
async fn integrity_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(FlakyLauncher::new(|| {
        EngineError::Integrity("checksum mismatch".into())
    }));
    let queue = QueueManager::new(
        store_in(&dir),
        Arc::clone(&launcher) as Arc<dyn TransferLauncher>,
        fast_retry(5),
        1,
    )
    .unwrap();

    let id = queue
        .enqueue("peer", "/tmp/corrupt", TransferPriority::Normal)
        .await;
    launcher.script(&id, 10);

    queue.tick().await;
    wait_for_state(&queue, &id, TransferState::Failed).await;

    let entry = queue.entry(&id).await.unwrap();
    assert_eq!(entry.retry_count, 0);
    assert!(entry.next_attempt_at_ms.is_none());
}

#[tokio::test]
async fn higher_priority_jumps_the_queue() {
    let dir = TempDir::new().unwrap();
    let order = Arc::new(Mutex::new(Vec::<String>::new()));

    struct RecordingLauncher(Arc<Mutex<Vec<String>>>);
    #[async_trait]
    impl TransferLauncher for RecordingLauncher {
        async fn launch(
            &self,
            entry: ResumableTransfer,
            _session: TransferSession,
        ) -> LaunchOutcome {
            self.0.lock().unwrap().push(entry.file_path.display().to_string());
            LaunchOutcome {
                metadata: None,
                result: Ok(()),
            }
        }
    }

    let queue = QueueManager::new(
        store_in(&dir),
        Arc::new(RecordingLauncher(Arc::clone(&order))),
        fast_retry(0),
        1,
    )
    .unwrap();

    let low = queue.enqueue("peer", "/tmp/low", TransferPriority::Low).await;
    let normal = queue
        .enqueue("peer", "/tmp/normal", TransferPriority::Normal)
        .await;
    let high = queue
        .enqueue("peer", "/tmp/high", TransferPriority::High)
        .await;
    let urgent = queue
        .enqueue("peer", "/tmp/urgent", TransferPriority::Urgent)
        .await;

    for id in [&urgent, &high, &normal, &low] {
        for _ in 0..100 {
            queue.tick().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if queue.entry(id).await.unwrap().state == TransferState::Completed {
                break;
            }
        }
    }

    assert_eq!(
        order.lock().unwrap().as_slice(),
        ["/tmp/urgent", "/tmp/high", "/tmp/normal", "/tmp/low"]
    );
}

#[tokio::test]
async fn paused_entries_are_skipped_until_resumed() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::new());
    let queue = QueueManager::new(
        store_in(&dir),
        Arc::clone(&launcher) as Arc<dyn TransferLauncher>,
        fast_retry(0),
        1,
    )
    .unwrap();

    let id = queue
        .enqueue("peer", "/tmp/held", TransferPriority::Normal)
        .await;
    queue.pause(&id).await.unwrap();

    queue.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 0);
    assert_eq!(queue.entry(&id).await.unwrap().state, TransferState::Paused);

    queue.resume(&id).await.unwrap();
    assert_eq!(queue.entry(&id).await.unwrap().state, TransferState::Queued);
    queue.tick().await;
    wait_for_state(&queue, &id, TransferState::Completed).await;
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_queued_entry_never_launches() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::new());
    let queue = QueueManager::new(
        store_in(&dir),
        Arc::clone(&launcher) as Arc<dyn TransferLauncher>,
        fast_retry(0),
        1,
    )
    .unwrap();

    let id = queue
        .enqueue("peer", "/tmp/gone", TransferPriority::Normal)
        .await;
    queue.cancel(&id).await.unwrap();
    // Cancelling again is a no-op.
    queue.cancel(&id).await.unwrap();

    queue.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 0);
    assert_eq!(
        queue.entry(&id).await.unwrap().state,
        TransferState::Cancelled
    );
}

#[tokio::test]
async fn snapshot_reload_demotes_in_flight_entries() {
    let dir = TempDir::new().unwrap();

    // Never returns, so the snapshot keeps showing the entry in flight.
    struct HangingLauncher;
    #[async_trait]
    impl TransferLauncher for HangingLauncher {
        async fn launch(
            &self,
            _entry: ResumableTransfer,
            _session: TransferSession,
        ) -> LaunchOutcome {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    {
        let queue = QueueManager::new(
            store_in(&dir),
            Arc::new(HangingLauncher),
            fast_retry(0),
            2,
        )
        .unwrap();
        queue
            .enqueue("peer", "/tmp/survivor", TransferPriority::High)
            .await;
        // Promote so the snapshot records a transferring entry, then drop
        // the manager before the launch finishes, as a crash would.
        queue.tick().await;
    }

    let queue = QueueManager::new(
        store_in(&dir),
        Arc::new(CountingLauncher::new()),
        fast_retry(0),
        2,
    )
    .unwrap();
    let entries = queue.entries_sorted().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, TransferState::Queued);
    assert_eq!(entries[0].priority, TransferPriority::High);
    assert_eq!(entries[0].peer, "peer");
}
