//! Periodic eviction of idle speaker contexts
//!
//! The sweep runs on a tokio interval and holds only a `Weak` reference to
//! the store, so it ends on its own once the store is dropped. It also stops
//! when the shutdown signal fires, when `stop()` is called, or when the
//! `CleanupScheduler` handle is dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::ContextStore;

/// Handle to a running cleanup task
pub struct CleanupScheduler {
    interval: Duration,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupScheduler {
    /// Start sweeping `store` every `interval`, dropping speakers idle for longer
    /// than `interval`. Must be called from within a tokio runtime.
    pub fn start(
        store: &Arc<ContextStore>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let weak: Weak<ContextStore> = Arc::downgrade(store);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let Some(store) = weak.upgrade() else {
                    tracing::debug!("Context store dropped, stopping cleanup sweeps");
                    break;
                };
                run_sweep(&store, interval);
            }

            tracing::debug!("Context cleanup scheduler stopped");
        });

        tracing::info!(
            "Started context cleanup scheduler (interval: {}s)",
            interval.as_secs()
        );

        Self {
            interval,
            stop_tx,
            task,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop sweeping and wait for the task to exit
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Cleanup scheduler task ended abnormally: {}", e);
        }
    }
}

/// One sweep. A panic inside the sweep is logged and the schedule continues.
fn run_sweep(store: &ContextStore, max_age: Duration) {
    match catch_unwind(AssertUnwindSafe(|| store.cleanup(max_age))) {
        Ok(removed) => {
            tracing::debug!(removed, remaining = store.len(), "Context sweep finished");
        }
        Err(_) => {
            tracing::error!("Context sweep failed; will retry on next interval");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_removes_idle_speakers() {
        let store = Arc::new(ContextStore::new(5, Duration::from_millis(50)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        store.append("s1", "hello", "hola");

        let scheduler = CleanupScheduler::start(&store, Duration::from_millis(50), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(store.get("s1").is_empty());
        assert!(scheduler.is_running());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_scheduler() {
        let store = Arc::new(ContextStore::new(5, Duration::from_secs(3600)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = CleanupScheduler::start(&store, Duration::from_secs(3600), shutdown_rx);
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while scheduler.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler should stop on shutdown");
    }

    #[tokio::test]
    async fn test_scheduler_ends_when_store_dropped() {
        let store = Arc::new(ContextStore::new(5, Duration::from_millis(20)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = CleanupScheduler::start(&store, Duration::from_millis(20), shutdown_rx);
        drop(store);

        tokio::time::timeout(Duration::from_secs(2), async {
            while scheduler.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler should stop once the store is gone");
    }
}
