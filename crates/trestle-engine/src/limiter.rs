//! Send-rate limiter with a one-second accounting window.

use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Caps outbound bytes per second.
///
/// Before sending N bytes the chunk loop calls [`SpeedLimiter::throttle`];
/// if N would push the current window over the cap, the call sleeps out the
/// remainder of the window first. The sleep is a cancellation suspension
/// point like any other await in the chunk loop.
pub struct SpeedLimiter {
    max_bytes_per_sec: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl SpeedLimiter {
    /// Limiter capped at `max_bytes_per_sec`. Zero disables limiting.
    #[must_use]
    pub fn new(max_bytes_per_sec: u64) -> Self {
        Self {
            max_bytes_per_sec,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    /// Account for `bytes` about to be sent, sleeping first if the current
    /// window is already at the cap.
    pub async fn throttle(&mut self, bytes: u64) {
        if self.max_bytes_per_sec == 0 {
            return;
        }

        let elapsed = self.window_start.elapsed();
        if elapsed >= WINDOW {
            self.window_start = Instant::now();
            self.window_bytes = 0;
        } else if self.window_bytes + bytes > self.max_bytes_per_sec {
            tokio::time::sleep(WINDOW - elapsed).await;
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }

        self.window_bytes += bytes;
    }
}
