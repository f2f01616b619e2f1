//! Periodic cleanup of keys past their retention window.

use keywarden_keystore::KeyManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handle to the background cleanup task.
pub struct CleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Run [`KeyManager::cleanup_old_keys`] every `interval` until shut down.
pub fn spawn_cleanup(keys: Arc<KeyManager>, interval: Duration) -> CleanupHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match keys.cleanup_old_keys() {
                        Ok(0) => {}
                        Ok(deleted) => debug!(deleted, "Scheduled key cleanup"),
                        Err(e) => error!(error = %e, "Scheduled key cleanup failed"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Key cleanup task stopped");
    });

    CleanupHandle { shutdown_tx, task }
}

impl CleanupHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Key cleanup task panicked");
        }
    }
}
