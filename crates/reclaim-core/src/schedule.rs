//! Cancellable repeating tasks.
//!
//! Each periodic loop in the runtime is a [`PeriodicTask`]: a spawned tokio
//! task that awaits an interval tick or cancellation, whichever comes first.
//! A tick already in progress runs to completion; cancellation only stops
//! further ticks.

use crate::cancel::CancellationToken;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Handle to a running periodic loop. Dropping aborts the loop.
pub struct PeriodicTask {
    name: String,
    period: Duration,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period`, starting one period from now.
    ///
    /// The loop ends when `token` is cancelled. Ticks that fall behind are
    /// delayed rather than bunched up.
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        token: CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let loop_name = name.clone();
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            debug!("{} started (every {:?})", loop_name, period);

            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }

            debug!("{} stopped", loop_name);
        });

        Self {
            name,
            period,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancel the loop. Shares the token, so sibling loops stop too.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the loop to exit after [`stop`](PeriodicTask::stop).
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("running", &self.is_running())
            .finish()
    }
}
