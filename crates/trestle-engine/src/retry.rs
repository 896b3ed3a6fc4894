//! Exponential backoff policy for retriable failures.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule: `min(initial * multiplier^n, max)` with optional
/// symmetric jitter, re-clamped into `[0, max]`. A non-finite exponential
/// term falls back to `max` rather than propagating `NaN` or infinity.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before a failure becomes permanent.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Per-attempt growth factor.
    pub backoff_multiplier: f64,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Jitter amplitude as a fraction of the base delay, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt `attempt` (0-based, clamped to
    /// `max_attempts`).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let n = attempt.min(self.max_attempts);
        let max = self.max_delay.as_secs_f64();

        let raw = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(n as i32);
        let base = if raw.is_finite() { raw.min(max) } else { max };

        let jittered = if self.jitter_factor > 0.0 {
            let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            base + base * self.jitter_factor * unit
        } else {
            base
        };

        Duration::from_secs_f64(jittered.clamp(0.0, max))
    }
}
