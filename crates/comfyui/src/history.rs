//! Typed views of the ComfyUI history and queue documents.
//!
//! `GET /history/{id}` returns `{"<prompt_id>": HistoryEntry}` once a
//! prompt has finished (successfully or not). While it is still waiting
//! or executing, `GET /queue` lists it under `queue_pending` or
//! `queue_running`.

use serde::Deserialize;

/// Status message type emitted when a node raises.
const MSG_EXECUTION_ERROR: &str = "execution_error";
/// Status message type emitted when execution was interrupted.
const MSG_EXECUTION_INTERRUPTED: &str = "execution_interrupted";

/// `status_str` reported for successful executions.
const STATUS_SUCCESS: &str = "success";
/// `status_str` reported for failed executions.
const STATUS_ERROR: &str = "error";

/// Image entries with this `type` are final outputs (others are previews).
const OUTPUT_KIND: &str = "output";

/// One prompt's record in the history document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Per-node outputs keyed by node id.
    #[serde(default)]
    pub outputs: serde_json::Value,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[message_type, data]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

/// Payload of an `execution_error` status message.
#[derive(Debug, Clone, Deserialize)]
struct ExecutionErrorData {
    #[serde(default)]
    node_type: Option<String>,
    #[serde(default)]
    exception_message: String,
    #[serde(default)]
    exception_type: Option<String>,
}

/// Final outcome recorded in a history entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success,
    /// Execution failed; one human-readable message per reported error.
    Error(Vec<String>),
    /// The entry exists but has not been marked finished yet.
    Incomplete,
}

impl HistoryEntry {
    /// Classify the entry by its status block.
    pub fn outcome(&self) -> ExecutionOutcome {
        let Some(status) = &self.status else {
            // Older servers omit the status block and only write history
            // for finished prompts.
            return ExecutionOutcome::Success;
        };

        let errors = status.error_messages();
        if status.status_str == STATUS_ERROR || !errors.is_empty() {
            if errors.is_empty() {
                return ExecutionOutcome::Error(vec![
                    "Execution failed without an error message".to_string(),
                ]);
            }
            return ExecutionOutcome::Error(errors);
        }

        if status.status_str == STATUS_SUCCESS || status.completed {
            ExecutionOutcome::Success
        } else {
            ExecutionOutcome::Incomplete
        }
    }

    /// Final output images across all output nodes, in node id order.
    pub fn output_images(&self) -> Vec<OutputImage> {
        output_images(&self.outputs)
    }
}

impl HistoryStatus {
    /// Human-readable messages for every error or interruption recorded.
    pub fn error_messages(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|(kind, data)| match kind.as_str() {
                MSG_EXECUTION_ERROR => Some(format_execution_error(data)),
                MSG_EXECUTION_INTERRUPTED => Some("Execution interrupted".to_string()),
                _ => None,
            })
            .collect()
    }
}

fn format_execution_error(data: &serde_json::Value) -> String {
    match serde_json::from_value::<ExecutionErrorData>(data.clone()) {
        Ok(err) => {
            let message = if err.exception_message.trim().is_empty() {
                err.exception_type
                    .unwrap_or_else(|| "Unknown execution error".to_string())
            } else {
                err.exception_message.trim().to_string()
            };
            match err.node_type {
                Some(node_type) => format!("{node_type}: {message}"),
                None => message,
            }
        }
        Err(_) => format!("Execution error: {data}"),
    }
}

/// One image written by an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl OutputImage {
    /// Path relative to the server's output directory.
    pub fn relative_path(&self) -> String {
        if self.subfolder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.subfolder.trim_end_matches('/'), self.filename)
        }
    }
}

/// Extract final output images from a history `outputs` object.
///
/// Preview and temp images are skipped. Malformed entries are ignored.
pub fn output_images(outputs: &serde_json::Value) -> Vec<OutputImage> {
    let Some(nodes) = outputs.as_object() else {
        return Vec::new();
    };

    let mut node_ids: Vec<&String> = nodes.keys().collect();
    node_ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string()));

    node_ids
        .into_iter()
        .filter_map(|id| nodes[id].get("images").and_then(|v| v.as_array()))
        .flatten()
        .filter_map(|image| serde_json::from_value::<OutputImage>(image.clone()).ok())
        .filter(|image| image.kind.is_empty() || image.kind == OUTPUT_KIND)
        .collect()
}

/// The `GET /queue` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueState {
    /// Items are `[number, prompt_id, prompt, extra_data, outputs_to_execute]`.
    #[serde(default)]
    pub queue_running: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub queue_pending: Vec<Vec<serde_json::Value>>,
}

/// Where a prompt currently sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Running,
    Pending,
    Absent,
}

impl QueueState {
    pub fn position(&self, prompt_id: &str) -> QueuePosition {
        if Self::contains(&self.queue_running, prompt_id) {
            QueuePosition::Running
        } else if Self::contains(&self.queue_pending, prompt_id) {
            QueuePosition::Pending
        } else {
            QueuePosition::Absent
        }
    }

    fn contains(items: &[Vec<serde_json::Value>], prompt_id: &str) -> bool {
        items
            .iter()
            .any(|item| item.get(1).and_then(|v| v.as_str()) == Some(prompt_id))
    }
}
