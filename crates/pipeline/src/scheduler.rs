//! Bounded-concurrency tick functions.
//!
//! Each tick re-reads its work from the store, so ticks are safe to run
//! repeatedly, after restarts, and from more than one process.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::status::GenerationStatus;

use crate::engine::RenderEngine;
use crate::error::GenerationError;
use crate::lifecycle::LifecycleController;
use crate::post_completion::PostCompletionPipeline;
use crate::store::GenerationRequestStore;

pub struct Scheduler {
    engine: Arc<dyn RenderEngine>,
    store: Arc<dyn GenerationRequestStore>,
    lifecycle: LifecycleController,
}

impl Scheduler {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        store: Arc<dyn GenerationRequestStore>,
        post_completion: PostCompletionPipeline,
    ) -> Self {
        let lifecycle = LifecycleController::new(engine.clone(), store.clone(), post_completion);
        Self {
            engine,
            store,
            lifecycle,
        }
    }

    /// Fail processing requests that outlive `timeout` on the engine.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle = self.lifecycle.with_processing_timeout(timeout);
        self
    }

    /// The controller used by the ticks, for one-off transitions such as
    /// user-initiated cancels.
    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Submit pending requests, oldest first, until `max_concurrent`
    /// requests are processing.
    ///
    /// Returns the number of requests moved to `processing`. An unhealthy
    /// engine aborts the tick with [`GenerationError::Connection`] before
    /// anything is submitted. Per-request failures are logged and skipped.
    pub async fn process_pending(&self, max_concurrent: usize) -> Result<usize, GenerationError> {
        if !self.engine.health().await {
            return Err(GenerationError::Connection(
                "Rendering engine failed its health probe".to_string(),
            ));
        }

        let processing = self.store.count_processing().await?;
        let available = max_concurrent.saturating_sub(processing);
        if available == 0 {
            tracing::debug!(processing, max_concurrent, "No spare generation capacity");
            return Ok(0);
        }

        let pending = self.store.get_pending(available).await?;
        let fetched = pending.len();
        let mut submitted = 0;

        for mut request in pending {
            match self.lifecycle.submit(&mut request).await {
                Ok(GenerationStatus::Processing) => submitted += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(request_id = request.id, error = %e, "Failed to submit generation");
                }
            }
        }

        if fetched > 0 {
            tracing::info!(fetched, submitted, available, "Processed pending generations");
        }
        Ok(submitted)
    }

    /// Poll every processing request once.
    ///
    /// Returns how many requests changed status. Per-request failures are
    /// logged and the request is retried on the next tick.
    pub async fn sync_processing(&self) -> Result<usize, GenerationError> {
        let processing = self.store.get_processing().await?;
        let polled = processing.len();
        let mut updated = 0;

        for mut request in processing {
            match self.lifecycle.poll(&mut request).await {
                Ok(GenerationStatus::Processing) => {}
                Ok(_) => updated += 1,
                Err(e) => {
                    tracing::error!(
                        request_id = request.id,
                        prompt_id = request.prompt_id.as_deref().unwrap_or_default(),
                        error = %e,
                        "Failed to sync generation status",
                    );
                }
            }
        }

        if updated > 0 {
            tracing::info!(polled, updated, "Synced processing generations");
        }
        Ok(updated)
    }
}
