//! # Scheduled task
//!
//! Runs a piece of asynchronous work once per interval until cancelled

use crate::Error;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type Work = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

pub struct ScheduledTask {
    interval: Duration,
    cancel: CancellationToken,
    work: Work,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn new(interval: Duration, work: Work) -> Self {
        Self {
            interval,
            cancel: CancellationToken::new(),
            work,
            handle: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the trigger loop on the current tokio runtime, the first run happens one interval
    /// from now
    ///
    /// Calling this on a running task does nothing
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("scheduled task already running");
            return;
        }

        let interval = self.interval;
        let cancel = self.cancel.clone();
        let work = self.work.clone();

        info!(?interval, "starting scheduled task");
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Cancellation is only observed between runs
                        if let Err(err) = work().await {
                            error!("scheduled run failed: {err}");
                        }
                    }
                }
            }

            info!("scheduled task stopped");
        }));
    }

    /// Signal the loop to stop, a run already in progress completes
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the loop and wait until it has exited
    pub async fn join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!("scheduled task panicked: {err}");
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
