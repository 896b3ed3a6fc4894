//! # Trestle Engine
//!
//! Transfer orchestration: session state machines, sending and receiving
//! drivers, the resumable priority queue with durable snapshots, retry
//! backoff, and send-rate limiting.
//!
//! One task drives one transfer's wire exchange, strictly one
//! unacknowledged chunk at a time; chunk preparation fans out through the
//! pipeline's bounded worker window inside that task. Shared state (the
//! queue's entry map, per-transfer sessions) lives behind narrow APIs, never
//! exposed raw to workers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod error;
pub mod limiter;
pub mod persist;
pub mod queue;
pub mod receiver;
pub mod retry;
pub mod sender;
pub mod session;

pub use config::{TransferConfig, LARGE_FILE_THRESHOLD};
pub use connection::{loopback_pair, StreamConnection};
pub use error::EngineError;
pub use limiter::SpeedLimiter;
pub use persist::QueueStore;
pub use queue::{
    LaunchOutcome, QueueManager, ResumableTransfer, StatusSummary, TransferLauncher,
    TransferPriority,
};
pub use receiver::TransferReceiver;
pub use retry::RetryPolicy;
pub use sender::TransferSender;
pub use session::{Direction, TransferSession, TransferState};
