//! Image generation parameters and validation.
//!
//! A [`GenerationSpec`] is the declarative input that [`crate::graph::compile`]
//! turns into an engine node graph. Validation is exhaustive: every violated
//! constraint is reported in one error, and nothing is built until the whole
//! spec passes.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Smallest number of images per request.
pub const MIN_BATCH_SIZE: i32 = 1;
/// Largest number of images per request.
pub const MAX_BATCH_SIZE: i32 = 10;

/// Smallest number of sampling steps.
pub const MIN_STEPS: i32 = 1;
/// Largest number of sampling steps.
pub const MAX_STEPS: i32 = 100;

/// Lower bound of the CFG scale.
pub const MIN_CFG_SCALE: f64 = 0.0;
/// Upper bound of the CFG scale.
pub const MAX_CFG_SCALE: f64 = 20.0;

/// Lower bound of the sampler denoise strength.
pub const MIN_DENOISE: f64 = 0.0;
/// Upper bound of the sampler denoise strength.
pub const MAX_DENOISE: f64 = 1.0;

/// Lower bound of a LoRA model/clip strength.
pub const MIN_LORA_STRENGTH: f64 = 0.0;
/// Upper bound of a LoRA model/clip strength.
pub const MAX_LORA_STRENGTH: f64 = 3.0;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_STEPS: i32 = 20;
pub const DEFAULT_CFG_SCALE: f64 = 7.0;
pub const DEFAULT_SAMPLER_NAME: &str = "euler";
pub const DEFAULT_SCHEDULER: &str = "normal";
pub const DEFAULT_DENOISE: f64 = 1.0;
pub const DEFAULT_FILENAME_PREFIX: &str = "atelier";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A LoRA adapter layered onto the checkpoint.
///
/// Adapters are applied in list order, each consuming the model/clip
/// outputs of the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraAdapter {
    /// Adapter filename as known to the engine.
    pub name: String,
    /// Strength applied to the diffusion model, in `[0, 3]`.
    pub strength_model: f64,
    /// Strength applied to the CLIP text encoder, in `[0, 3]`.
    pub strength_clip: f64,
}

/// Sampler parameters passed verbatim to the sampler node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSettings {
    pub seed: i64,
    pub steps: i32,
    pub cfg_scale: f64,
    pub sampler_name: String,
    pub scheduler: String,
    pub denoise: f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            steps: DEFAULT_STEPS,
            cfg_scale: DEFAULT_CFG_SCALE,
            sampler_name: DEFAULT_SAMPLER_NAME.to_string(),
            scheduler: DEFAULT_SCHEDULER.to_string(),
            denoise: DEFAULT_DENOISE,
        }
    }
}

/// Declarative description of one image generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    /// Checkpoint (base model) filename.
    pub checkpoint: String,
    #[serde(default)]
    pub loras: Vec<LoraAdapter>,
    pub width: i32,
    pub height: i32,
    pub batch_size: i32,
    #[serde(default)]
    pub sampler: SamplerSettings,
    pub filename_prefix: String,
}

impl GenerationSpec {
    /// Validate every constraint, returning all violations joined by `"; "`.
    pub fn validate(&self) -> Result<(), CoreError> {
        let violations = spec_violations(self);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(violations.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// List every constraint the spec violates, in field order.
///
/// An empty result means the spec is valid.
pub fn spec_violations(spec: &GenerationSpec) -> Vec<String> {
    let mut violations = Vec::new();

    if spec.prompt.trim().is_empty() {
        violations.push("prompt must not be empty".to_string());
    }
    if spec.checkpoint.trim().is_empty() {
        violations.push("checkpoint must be set".to_string());
    }
    if spec.width <= 0 {
        violations.push(format!("width must be positive, got {}", spec.width));
    }
    if spec.height <= 0 {
        violations.push(format!("height must be positive, got {}", spec.height));
    }
    if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&spec.batch_size) {
        violations.push(format!(
            "batch_size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {}",
            spec.batch_size
        ));
    }
    if !(MIN_STEPS..=MAX_STEPS).contains(&spec.sampler.steps) {
        violations.push(format!(
            "steps must be between {MIN_STEPS} and {MAX_STEPS}, got {}",
            spec.sampler.steps
        ));
    }
    // `contains` is false for NaN, so NaN is rejected too.
    if !(MIN_CFG_SCALE..=MAX_CFG_SCALE).contains(&spec.sampler.cfg_scale) {
        violations.push(format!(
            "cfg_scale must be between {MIN_CFG_SCALE} and {MAX_CFG_SCALE}, got {}",
            spec.sampler.cfg_scale
        ));
    }
    if !(MIN_DENOISE..=MAX_DENOISE).contains(&spec.sampler.denoise) {
        violations.push(format!(
            "denoise must be between {MIN_DENOISE} and {MAX_DENOISE}, got {}",
            spec.sampler.denoise
        ));
    }

    for (index, lora) in spec.loras.iter().enumerate() {
        if lora.name.trim().is_empty() {
            violations.push(format!("loras[{index}].name must not be empty"));
        }
        for (field, value) in [
            ("strength_model", lora.strength_model),
            ("strength_clip", lora.strength_clip),
        ] {
            if !(MIN_LORA_STRENGTH..=MAX_LORA_STRENGTH).contains(&value) {
                violations.push(format!(
                    "loras[{index}].{field} must be between {MIN_LORA_STRENGTH} and \
                     {MAX_LORA_STRENGTH}, got {value}"
                ));
            }
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
