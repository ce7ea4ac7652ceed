//! Generation request entity model.

use std::collections::BTreeMap;

use atelier_core::error::CoreError;
use atelier_core::generation::{GenerationSpec, LoraAdapter, SamplerSettings};
use atelier_core::status::{GenerationStatus, StatusId};
use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `generation_requests` table.
///
/// The spec fields are stored denormalized; [`GenerationRequest::spec`]
/// reassembles them for the graph compiler.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct GenerationRequest {
    pub id: DbId,
    pub user_id: DbId,

    pub prompt: String,
    pub negative_prompt: String,
    pub checkpoint: String,
    pub loras: Json<Vec<LoraAdapter>>,
    pub width: i32,
    pub height: i32,
    pub batch_size: i32,
    pub seed: i64,
    pub steps: i32,
    pub cfg_scale: f64,
    pub sampler_name: String,
    pub scheduler: String,
    pub denoise: f64,
    pub filename_prefix: String,

    pub status_id: StatusId,
    /// Engine correlation id, set on successful submission.
    pub prompt_id: Option<String>,
    pub output_paths: Vec<String>,
    /// Source image path -> thumbnail path.
    pub thumbnail_paths: Json<BTreeMap<String, String>>,
    pub error_message: Option<String>,

    /// Optimistic concurrency token, bumped on every save.
    pub version: i32,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl GenerationRequest {
    /// Build an unsaved pending request from a spec.
    ///
    /// Used by in-memory stores; the database assigns ids on insert.
    pub fn new_pending(id: DbId, user_id: DbId, spec: &GenerationSpec, now: Timestamp) -> Self {
        Self {
            id,
            user_id,
            prompt: spec.prompt.clone(),
            negative_prompt: spec.negative_prompt.clone(),
            checkpoint: spec.checkpoint.clone(),
            loras: Json(spec.loras.clone()),
            width: spec.width,
            height: spec.height,
            batch_size: spec.batch_size,
            seed: spec.sampler.seed,
            steps: spec.sampler.steps,
            cfg_scale: spec.sampler.cfg_scale,
            sampler_name: spec.sampler.sampler_name.clone(),
            scheduler: spec.sampler.scheduler.clone(),
            denoise: spec.sampler.denoise,
            filename_prefix: spec.filename_prefix.clone(),
            status_id: GenerationStatus::Pending.id(),
            prompt_id: None,
            output_paths: Vec::new(),
            thumbnail_paths: Json(BTreeMap::new()),
            error_message: None,
            version: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Decode the stored status id.
    pub fn status(&self) -> Result<GenerationStatus, CoreError> {
        GenerationStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Validation(format!(
                "Generation request {} has unknown status id {}",
                self.id, self.status_id
            ))
        })
    }

    /// Reassemble the generation spec from the denormalized columns.
    pub fn spec(&self) -> GenerationSpec {
        GenerationSpec {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            checkpoint: self.checkpoint.clone(),
            loras: self.loras.0.clone(),
            width: self.width,
            height: self.height,
            batch_size: self.batch_size,
            sampler: SamplerSettings {
                seed: self.seed,
                steps: self.steps,
                cfg_scale: self.cfg_scale,
                sampler_name: self.sampler_name.clone(),
                scheduler: self.scheduler.clone(),
                denoise: self.denoise,
            },
            filename_prefix: self.filename_prefix.clone(),
        }
    }
}
