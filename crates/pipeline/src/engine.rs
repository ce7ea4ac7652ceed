//! Rendering engine seam and its ComfyUI implementation.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use atelier_comfyui::api::ComfyUIApi;
use atelier_comfyui::history::{
    output_images, ExecutionOutcome, HistoryEntry, QueuePosition, QueueState,
};
use atelier_core::graph::NodeGraph;

use crate::error::GenerationError;

/// Remote execution state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    pub status: EngineStatus,
    /// Engine-specific output document, meaningful when `Completed`.
    pub outputs: serde_json::Value,
    /// Error messages, meaningful when `Failed`.
    pub errors: Vec<String>,
}

impl EngineReport {
    pub fn queued() -> Self {
        Self::with_status(EngineStatus::Queued)
    }

    pub fn running() -> Self {
        Self::with_status(EngineStatus::Running)
    }

    pub fn completed(outputs: serde_json::Value) -> Self {
        Self {
            outputs,
            ..Self::with_status(EngineStatus::Completed)
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            errors,
            ..Self::with_status(EngineStatus::Failed)
        }
    }

    fn with_status(status: EngineStatus) -> Self {
        Self {
            status,
            outputs: serde_json::Value::Null,
            errors: Vec::new(),
        }
    }
}

/// Client for the external rendering engine.
///
/// Every remote call must be bounded by a timeout so a stalled engine
/// cannot hang a scheduler tick.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Liveness probe. Never errors; an unreachable engine is unhealthy.
    async fn health(&self) -> bool;

    /// Queue a compiled graph, returning the engine's correlation id.
    async fn submit(&self, graph: &NodeGraph) -> Result<String, GenerationError>;

    async fn poll_status(&self, correlation_id: &str) -> Result<EngineReport, GenerationError>;

    /// Ask the engine to drop or stop an execution. `Ok(false)` means the
    /// engine did not acknowledge the cancel.
    async fn cancel(&self, correlation_id: &str) -> Result<bool, GenerationError>;

    /// File paths of the final outputs listed in a completed report.
    fn list_output_files(&self, outputs: &serde_json::Value) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// ComfyUI
// ---------------------------------------------------------------------------

/// [`RenderEngine`] backed by a single ComfyUI instance.
pub struct ComfyUIEngine {
    api: ComfyUIApi,
    /// ComfyUI's output directory as seen from this process.
    output_dir: PathBuf,
    health_timeout: Duration,
}

impl ComfyUIEngine {
    pub fn new(api: ComfyUIApi, output_dir: PathBuf, health_timeout: Duration) -> Self {
        Self {
            api,
            output_dir,
            health_timeout,
        }
    }

    fn output_path(&self, relative: &str) -> String {
        self.output_dir.join(relative).to_string_lossy().into_owned()
    }
}

#[async_trait]
impl RenderEngine for ComfyUIEngine {
    async fn health(&self) -> bool {
        match self.api.system_stats(self.health_timeout).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    api_url = %self.api.api_url(),
                    error = %e,
                    "ComfyUI health probe failed",
                );
                false
            }
        }
    }

    async fn submit(&self, graph: &NodeGraph) -> Result<String, GenerationError> {
        let response = self.api.submit_workflow(&graph.to_prompt_json()).await?;
        Ok(response.prompt_id)
    }

    async fn poll_status(&self, correlation_id: &str) -> Result<EngineReport, GenerationError> {
        if let Some(entry) = self.api.get_history(correlation_id).await? {
            return Ok(report_from_history(entry));
        }

        // Not in history yet: still waiting or executing.
        let queue = self.api.get_queue().await?;
        Ok(report_from_queue(&queue, correlation_id))
    }

    async fn cancel(&self, correlation_id: &str) -> Result<bool, GenerationError> {
        let interrupt = needs_interrupt(&self.api.get_queue().await?, correlation_id);

        self.api.cancel_execution(correlation_id).await?;
        if interrupt {
            self.api.interrupt().await?;
        }

        tracing::debug!(prompt_id = %correlation_id, interrupted = interrupt, "ComfyUI execution cancelled");
        Ok(true)
    }

    fn list_output_files(&self, outputs: &serde_json::Value) -> Vec<String> {
        output_images(outputs)
            .iter()
            .map(|image| self.output_path(&image.relative_path()))
            .collect()
    }
}

/// Map a finished or in-flight history entry to a report.
pub fn report_from_history(entry: HistoryEntry) -> EngineReport {
    match entry.outcome() {
        ExecutionOutcome::Success => EngineReport::completed(entry.outputs),
        ExecutionOutcome::Error(messages) => EngineReport::failed(messages),
        ExecutionOutcome::Incomplete => EngineReport::running(),
    }
}

/// Map the queue position of a prompt that has no history entry yet.
///
/// A prompt that was just accepted may be missing from the queue as well,
/// so absence is reported as queued.
pub fn report_from_queue(queue: &QueueState, prompt_id: &str) -> EngineReport {
    match queue.position(prompt_id) {
        QueuePosition::Running => EngineReport::running(),
        QueuePosition::Pending => EngineReport::queued(),
        QueuePosition::Absent => {
            tracing::warn!(
                prompt_id = %prompt_id,
                "Prompt is in neither history nor queue, reporting as queued",
            );
            EngineReport::queued()
        }
    }
}

/// Deleting a prompt from the queue does not stop it once it is executing;
/// only then does a cancel also need `/interrupt`.
pub fn needs_interrupt(queue: &QueueState, prompt_id: &str) -> bool {
    queue.position(prompt_id) == QueuePosition::Running
}
