//! Trailing-edge debouncing of backport triggers.
//!
//! Merges to the main branch tend to arrive in bursts. Each one triggers a
//! backport cycle, but only the state after the burst matters, so the cycle
//! runs once the triggers have been quiet for a while.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Debouncer {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn the background task that runs `action` after each quiet period.
    ///
    /// Triggers that arrive while `action` is running are coalesced into one
    /// further run.
    pub fn spawn<F, Fut>(quiet_period: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let notify = Arc::new(Notify::new());
        let waiter = notify.clone();

        let task = tokio::spawn(async move {
            loop {
                waiter.notified().await;
                loop {
                    tokio::select! {
                        _ = waiter.notified() => debug!("Trigger during quiet period, restarting wait"),
                        _ = tokio::time::sleep(quiet_period) => break,
                    }
                }
                action().await;
            }
        });

        Self { notify, task }
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
