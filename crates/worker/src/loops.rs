//! Periodic scheduler ticks.
//!
//! Each loop awaits its tick before waiting for the next one, so ticks of
//! the same loop never overlap. Missed ticks are delayed, not burst.

use std::sync::Arc;
use std::time::Duration;

use atelier_pipeline::scheduler::Scheduler;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Submits pending requests up to the concurrency cap.
pub struct PendingSubmitter {
    scheduler: Arc<Scheduler>,
    max_concurrent: usize,
    poll_interval: Duration,
}

impl PendingSubmitter {
    pub fn new(scheduler: Arc<Scheduler>, max_concurrent: usize, poll_interval: Duration) -> Self {
        Self {
            scheduler,
            max_concurrent,
            poll_interval,
        }
    }

    /// Run until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = ticker(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_concurrent = self.max_concurrent,
            "Pending submitter started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Pending submitter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.scheduler.process_pending(self.max_concurrent).await {
                        Ok(0) => {}
                        Ok(submitted) => tracing::debug!(submitted, "Pending tick finished"),
                        Err(e) => tracing::error!(error = %e, "Pending tick failed"),
                    }
                }
            }
        }
    }
}

/// Reconciles processing requests with the engine.
pub struct ProcessingSync {
    scheduler: Arc<Scheduler>,
    poll_interval: Duration,
}

impl ProcessingSync {
    pub fn new(scheduler: Arc<Scheduler>, poll_interval: Duration) -> Self {
        Self {
            scheduler,
            poll_interval,
        }
    }

    /// Run until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = ticker(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Processing sync started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Processing sync shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.scheduler.sync_processing().await {
                        Ok(0) => {}
                        Ok(updated) => tracing::debug!(updated, "Sync tick finished"),
                        Err(e) => tracing::error!(error = %e, "Sync tick failed"),
                    }
                }
            }
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
