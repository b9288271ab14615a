use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lock::{Lock, LockManager};

/// Background lease refresher.
///
/// Refreshes the lock every `ttl/3` until stopped. The first refresh failure
/// flips the lost flag and ends the task; the engine checks [`Heartbeat::is_lost`]
/// before dispatching each stage and aborts instead of working without the
/// lease. Dropping the heartbeat aborts the task.
pub struct Heartbeat {
    handle: JoinHandle<()>,
    lost_rx: watch::Receiver<bool>,
}

impl Heartbeat {
    pub fn spawn(manager: Arc<dyn LockManager>, lock: Lock) -> Self {
        let (lost_tx, lost_rx) = watch::channel(false);
        let period = Duration::from_secs((lock.ttl_seconds / 3).max(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                match manager.refresh(&lock).await {
                    Ok(refreshed) => {
                        debug!(key = %lock.key, expires_at = %refreshed.expires_at, "lease refreshed");
                    }
                    Err(e) => {
                        warn!(key = %lock.key, error = %e, "lease refresh failed; lock lost");
                        let _ = lost_tx.send(true);
                        break;
                    }
                }
            }
        });

        Self { handle, lost_rx }
    }

    /// Whether a refresh has failed since the heartbeat started.
    pub fn is_lost(&self) -> bool {
        *self.lost_rx.borrow()
    }

    /// Stop refreshing. Called before release on every exit path.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
