//! Background sweeping of finished runs.
//!
//! The tracker keeps every submitted run in memory; without a sweeper a
//! long-running service grows without bound.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::tracker::TaskTracker;

/// Sweep cadence and retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// How often to sweep (default: 5 minutes)
    pub interval: Duration,
    /// Age past which a run is dropped (default: 24 hours)
    pub retention: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl From<&crate::types::ExecutionConfig> for SweepConfig {
    fn from(config: &crate::types::ExecutionConfig) -> Self {
        Self {
            interval: config.sweep_interval,
            retention: config.task_retention,
        }
    }
}

/// Periodically runs [`TaskTracker::cleanup_older_than`].
#[derive(Debug)]
pub struct TrackerSweeper {
    tracker: Arc<TaskTracker>,
    config: SweepConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TrackerSweeper {
    pub fn new(tracker: Arc<TaskTracker>, config: SweepConfig) -> Self {
        Self {
            tracker,
            config,
            stop_tx: None,
        }
    }

    /// Start the sweep loop in the background.
    /// Returns immediately; sweeping runs in a spawned task.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(&self.tracker);
        let config = self.config;
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = interval(config.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = Self::sweep_once(&tracker, config.retention);
                        if removed > 0 {
                            tracing::info!(removed, "tracker_sweep_completed");
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("tracker_sweeper_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the sweep loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// One sweep, outside the loop.
    pub fn sweep_once(tracker: &TaskTracker, retention: Duration) -> usize {
        tracker.cleanup_older_than(retention)
    }
}

impl Drop for TrackerSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
