//! Per-request state machine: submit, poll, cancel.
//!
//! Every transition is applied to a copy of the request, saved through the
//! store, and only then written back to the caller's value. A failed save
//! leaves the caller's request exactly as it was.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::graph;
use atelier_core::status::GenerationStatus;
use atelier_db::models::generation_request::GenerationRequest;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::engine::{EngineStatus, RenderEngine};
use crate::error::GenerationError;
use crate::post_completion::PostCompletionPipeline;
use crate::store::GenerationRequestStore;

/// Recorded when the engine reports failure without any message.
const UNKNOWN_ENGINE_FAILURE: &str = "Generation failed on the rendering engine";

pub struct LifecycleController {
    engine: Arc<dyn RenderEngine>,
    store: Arc<dyn GenerationRequestStore>,
    post_completion: PostCompletionPipeline,
    processing_timeout: Option<Duration>,
}

impl LifecycleController {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        store: Arc<dyn GenerationRequestStore>,
        post_completion: PostCompletionPipeline,
    ) -> Self {
        Self {
            engine,
            store,
            post_completion,
            processing_timeout: None,
        }
    }

    /// Fail requests that are still queued or running on the engine this
    /// long after they were submitted.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = Some(timeout);
        self
    }

    /// Compile a pending request and hand it to the engine.
    ///
    /// A compile failure leaves the request pending and is returned as
    /// [`GenerationError::Validation`]. An engine rejection is recorded as
    /// `failed` and is not an error for the caller. Returns the new status.
    pub async fn submit(
        &self,
        request: &mut GenerationRequest,
    ) -> Result<GenerationStatus, GenerationError> {
        let status = request.status()?;
        if status != GenerationStatus::Pending {
            return Err(GenerationError::Validation(format!(
                "Cannot submit request {}: status is {status}",
                request.id
            )));
        }

        let graph = graph::compile(&request.spec())?;

        match self.engine.submit(&graph).await {
            Ok(prompt_id) => {
                let started_at = Utc::now();
                self.commit(request, GenerationStatus::Processing, |next| {
                    next.prompt_id = Some(prompt_id);
                    next.started_at = Some(started_at);
                })
                .await?;

                tracing::info!(
                    request_id = request.id,
                    prompt_id = request.prompt_id.as_deref().unwrap_or_default(),
                    nodes = graph.len(),
                    "Generation submitted",
                );
                Ok(GenerationStatus::Processing)
            }
            Err(e) => {
                let message = format!("Engine submission failed: {e}");
                self.fail(request, message).await?;
                Ok(GenerationStatus::Failed)
            }
        }
    }

    /// Reconcile a processing request with the engine.
    ///
    /// Requests in any other status are returned unchanged. While the
    /// engine is still working this is a no-op, unless the processing
    /// timeout has elapsed: the execution is then cancelled on the engine
    /// and the request fails. Engine errors leave the request untouched for
    /// the next poll.
    pub async fn poll(
        &self,
        request: &mut GenerationRequest,
    ) -> Result<GenerationStatus, GenerationError> {
        let status = request.status()?;
        if status != GenerationStatus::Processing {
            tracing::debug!(request_id = request.id, %status, "Poll skipped, request not processing");
            return Ok(status);
        }

        let Some(prompt_id) = request.prompt_id.clone() else {
            self.fail(request, "Processing request has no engine correlation id".to_string())
                .await?;
            return Ok(GenerationStatus::Failed);
        };

        let report = self.engine.poll_status(&prompt_id).await?;
        match report.status {
            EngineStatus::Queued | EngineStatus::Running => {
                if let Some(timeout) = self.expired_timeout(request, Utc::now()) {
                    if let Err(e) = self.engine.cancel(&prompt_id).await {
                        tracing::warn!(
                            request_id = request.id,
                            prompt_id = %prompt_id,
                            error = %e,
                            "Remote cancel of timed-out generation failed",
                        );
                    }
                    let message = format!(
                        "Generation timed out after {}s on the rendering engine",
                        timeout.as_secs()
                    );
                    self.fail(request, message).await?;
                    return Ok(GenerationStatus::Failed);
                }

                tracing::debug!(
                    request_id = request.id,
                    prompt_id = %prompt_id,
                    engine_status = ?report.status,
                    "Generation still in progress",
                );
                Ok(GenerationStatus::Processing)
            }
            EngineStatus::Completed => {
                let raw_paths = self.engine.list_output_files(&report.outputs);
                let outputs = self
                    .post_completion
                    .run(request.id, request.user_id, raw_paths)
                    .await;

                let completed_at = Utc::now();
                self.commit(request, GenerationStatus::Completed, |next| {
                    next.output_paths = outputs.output_paths;
                    next.thumbnail_paths = Json(outputs.thumbnails);
                    next.error_message = None;
                    next.completed_at = Some(completed_at);
                })
                .await?;

                tracing::info!(
                    request_id = request.id,
                    prompt_id = %prompt_id,
                    outputs = request.output_paths.len(),
                    "Generation completed",
                );
                Ok(GenerationStatus::Completed)
            }
            EngineStatus::Failed => {
                self.fail(request, failure_message(&report.errors)).await?;
                Ok(GenerationStatus::Failed)
            }
        }
    }

    /// Cancel a pending or processing request.
    ///
    /// The remote cancel is advisory: its failure is logged and the request
    /// is cancelled locally regardless.
    pub async fn cancel(&self, request: &mut GenerationRequest) -> Result<(), GenerationError> {
        let status = request.status()?;
        if status.is_terminal() {
            return Err(GenerationError::Validation(format!(
                "Cannot cancel request {}: already {status}",
                request.id
            )));
        }

        if let Some(prompt_id) = request.prompt_id.as_deref() {
            match self.engine.cancel(prompt_id).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    request_id = request.id,
                    prompt_id = %prompt_id,
                    "Engine did not acknowledge cancel",
                ),
                Err(e) => tracing::warn!(
                    request_id = request.id,
                    prompt_id = %prompt_id,
                    error = %e,
                    "Remote cancel failed, cancelling locally",
                ),
            }
        }

        let completed_at = Utc::now();
        self.commit(request, GenerationStatus::Cancelled, |next| {
            next.error_message = None;
            next.completed_at = Some(completed_at);
        })
        .await?;

        tracing::info!(request_id = request.id, from = %status, "Generation cancelled");
        Ok(())
    }

    async fn fail(
        &self,
        request: &mut GenerationRequest,
        message: String,
    ) -> Result<(), GenerationError> {
        let completed_at = Utc::now();
        self.commit(request, GenerationStatus::Failed, |next| {
            next.error_message = Some(message);
            next.completed_at = Some(completed_at);
        })
        .await?;

        tracing::warn!(
            request_id = request.id,
            error = request.error_message.as_deref().unwrap_or_default(),
            "Generation failed",
        );
        Ok(())
    }

    /// The configured timeout, if the request has been processing longer.
    fn expired_timeout(
        &self,
        request: &GenerationRequest,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let timeout = self.processing_timeout?;
        let started_at = request.started_at?;
        let limit = chrono::Duration::from_std(timeout).ok()?;
        (now - started_at > limit).then_some(timeout)
    }

    /// Apply `to` and `update` to a copy, save it, then publish it.
    async fn commit<F>(
        &self,
        request: &mut GenerationRequest,
        to: GenerationStatus,
        update: F,
    ) -> Result<(), GenerationError>
    where
        F: FnOnce(&mut GenerationRequest) + Send,
    {
        request.status()?.validate_transition(to)?;

        let mut next = request.clone();
        next.status_id = to.id();
        update(&mut next);

        self.store.save(&mut next).await?;
        *request = next;
        Ok(())
    }
}

fn failure_message(errors: &[String]) -> String {
    let messages: Vec<&str> = errors
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect();

    if messages.is_empty() {
        UNKNOWN_ENGINE_FAILURE.to_string()
    } else {
        messages.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_joins_non_empty_errors() {
        let errors = vec![
            "KSampler: out of memory".to_string(),
            "  ".to_string(),
            "Execution interrupted".to_string(),
        ];
        assert_eq!(
            failure_message(&errors),
            "KSampler: out of memory; Execution interrupted"
        );
    }

    #[test]
    fn failure_message_never_empty() {
        assert_eq!(failure_message(&[]), UNKNOWN_ENGINE_FAILURE);
        assert_eq!(failure_message(&[String::new()]), UNKNOWN_ENGINE_FAILURE);
    }
}
