//! Progress bar driven by a live transfer session.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::task::JoinHandle;
use trestle_engine::TransferSession;

const REFRESH: Duration = Duration::from_millis(100);

/// Render a byte count with a binary unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Progress bar that tracks a session until it reaches a terminal state.
pub struct TransferProgress {
    bar: ProgressBar,
    poller: JoinHandle<()>,
}

impl TransferProgress {
    /// Show a bar for `label` and start polling `session`.
    pub fn spawn(session: TransferSession, label: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg:20!} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.set_message(label.to_owned());

        let poller = {
            let bar = bar.clone();
            tokio::spawn(async move {
                loop {
                    bar.set_length(session.total_bytes());
                    bar.set_position(session.bytes_transferred());
                    if session.state().is_terminal() {
                        break;
                    }
                    tokio::time::sleep(REFRESH).await;
                }
            })
        };

        Self { bar, poller }
    }

    /// Stop polling and print a completion line.
    pub async fn finish(self, outcome: &str) {
        self.poller.abort();
        let _ = self.poller.await;
        self.bar.finish_with_message(outcome.to_owned());
    }
}
