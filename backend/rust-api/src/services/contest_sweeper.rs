use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::metrics::CONTEST_SWEEPER_TICKS_TOTAL;
use crate::services::attack_window::AttackWindowManager;
use crate::services::capture_service::CaptureService;

/// Periodically clears expired contests and overdue quiz sessions so that
/// subscribers see the cleared state without waiting for the next capture.
pub struct ContestSweeper {
    contests: AttackWindowManager,
    captures: CaptureService,
    interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub contests_cleared: usize,
    pub sessions_lost: usize,
}

impl ContestSweeper {
    pub fn new(
        contests: AttackWindowManager,
        captures: CaptureService,
        interval: Duration,
    ) -> Self {
        Self {
            contests,
            captures,
            interval,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting contest sweeper loop (interval {}s)",
            self.interval.as_secs()
        );

        loop {
            match self.run_once().await {
                Ok(report) => {
                    CONTEST_SWEEPER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    debug!(
                        contests_cleared = report.contests_cleared,
                        sessions_lost = report.sessions_lost,
                        "Contest sweeper tick completed"
                    );
                }
                Err(err) => {
                    CONTEST_SWEEPER_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "Contest sweeper tick failed");
                }
            }

            sleep(self.interval).await;
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        // Sessions first: a timed-out quiz releases its contest right away.
        let sessions_lost = self.captures.purge_stale_sessions().await;
        let contests_cleared = self.contests.sweep_expired().await?;
        Ok(SweepReport {
            contests_cleared,
            sessions_lost,
        })
    }
}
