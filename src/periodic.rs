//! Background tasks that run on a fixed interval until cancelled

use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to a spawned periodic task
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` every `interval`, first run after one full interval.
    /// The task stops when `cancel` (or a parent token) is cancelled.
    pub fn spawn<F, Fut>(
        name: &'static str,
        interval: Duration,
        cancel: CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            tracing::debug!("Periodic task '{}' stopped", name);
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Cancel the task and wait for the current tick to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Periodic task '{}' ended abnormally: {}", self.name, e);
        }
    }
}
