//! Periodic rotation check running as a tokio task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::manager::SecretRotationManager;

/// Calls [`SecretRotationManager::rotate_if_due`] every `interval`.
pub struct RotationScheduler {
    manager: Arc<SecretRotationManager>,
    interval: Duration,
}

impl RotationScheduler {
    pub fn new(manager: Arc<SecretRotationManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Start the task on the current runtime.
    pub fn spawn(self) -> RotationHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let Self { manager, interval } = self;

        info!(interval_secs = interval.as_secs_f64(), "Secret rotation scheduler started");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.rotate_if_due() {
                            Ok(true) => debug!("Scheduled rotation performed"),
                            Ok(false) => {}
                            Err(e) if !e.is_fatal() => warn!(error = %e, "Scheduled rotation incomplete"),
                            Err(e) => error!(error = %e, "Scheduled rotation failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Secret rotation scheduler stopped");
        });

        RotationHandle { shutdown_tx, task }
    }
}

/// Handle to a running [`RotationScheduler`].
pub struct RotationHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Rotation scheduler task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
