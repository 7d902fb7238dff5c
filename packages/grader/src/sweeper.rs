use std::sync::Arc;
use std::time::Duration;

use common::TrackerConfig;
use common::retry::spawn_cleanup_task;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::tracker::StatusTracker;

/// Run the stuck job sweeper until `shutdown` fires.
///
/// Each pass fails jobs still queued or running past the judging timeout,
/// then forgets terminal jobs older than the retry retention window.
pub async fn run_stuck_job_sweeper(
    tracker: Arc<StatusTracker>,
    config: TrackerConfig,
    shutdown: CancellationToken,
) {
    let retention = Duration::from_secs(config.retry_max_age_secs);

    info!(
        timeout_secs = config.job_timeout_secs,
        scan_interval_secs = config.sweep_interval_secs,
        "Starting stuck job sweeper"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stuck job sweeper stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let resolved = tracker.sweep_stuck().await;
        if resolved > 0 {
            info!(count = resolved, "Resolved stuck jobs to error");
        }

        let evicted = tracker.evict_terminal(retention);
        if evicted > 0 {
            debug!(count = evicted, "Evicted finished jobs");
        }
    }
}

/// Handles of the orchestrator's background loops.
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    sweeper: JoinHandle<()>,
    retry_cleanup: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn spawn(tracker: Arc<StatusTracker>, config: &TrackerConfig) -> Self {
        let shutdown = CancellationToken::new();
        let retry_cleanup = spawn_cleanup_task(
            tracker.retry_state(),
            Duration::from_secs(config.retry_cleanup_interval_secs.max(1)),
            Duration::from_secs(config.retry_max_age_secs),
        );
        let sweeper = tokio::spawn(run_stuck_job_sweeper(
            tracker,
            config.clone(),
            shutdown.clone(),
        ));
        Self {
            shutdown,
            sweeper,
            retry_cleanup,
        }
    }

    /// Stop both loops and wait for the sweeper to finish its pass.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.retry_cleanup.abort();
        let _ = self.sweeper.await;
        let _ = self.retry_cleanup.await;
    }
}
