//! Graph compiler for the rendering engine (ComfyUI API format).
//!
//! [`compile`] turns a validated [`GenerationSpec`] into an immutable
//! [`NodeGraph`]:
//!
//! ```text
//! checkpoint ─┬─ model/clip ─> lora 1 ─> ... ─> lora N ─┬─ clip ─> encode (+)
//!             │                                         ├─ clip ─> encode (-)
//!             │                                         └─ model ─┐
//!             │                          empty latent ────────────┤
//!             │                                                   v
//!             └──────────── vae ──────────────> decode <───── sampler
//!                                                 │
//!                                                 v
//!                                               save
//! ```
//!
//! Node ids are assigned from a counter starting at 1, so every input
//! reference points at a node with a smaller id. [`summarize`] is the
//! lossy inverse used for inspection.

use std::fmt;

use serde::Serialize;

use crate::error::CoreError;
use crate::generation::{GenerationSpec, LoraAdapter, SamplerSettings};

// ---------------------------------------------------------------------------
// ComfyUI node class types
// ---------------------------------------------------------------------------

pub const CHECKPOINT_LOADER_CLASS: &str = "CheckpointLoaderSimple";
pub const LORA_LOADER_CLASS: &str = "LoraLoader";
pub const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";
pub const EMPTY_LATENT_IMAGE_CLASS: &str = "EmptyLatentImage";
pub const KSAMPLER_CLASS: &str = "KSampler";
pub const VAE_DECODE_CLASS: &str = "VAEDecode";
pub const SAVE_IMAGE_CLASS: &str = "SaveImage";

// ---------------------------------------------------------------------------
// Output slot indices
// ---------------------------------------------------------------------------

const CHECKPOINT_MODEL_SLOT: u32 = 0;
const CHECKPOINT_CLIP_SLOT: u32 = 1;
const CHECKPOINT_VAE_SLOT: u32 = 2;
const LORA_MODEL_SLOT: u32 = 0;
const LORA_CLIP_SLOT: u32 = 1;
/// Slot of nodes with a single output (encoders, latent, sampler, decoder).
const SINGLE_OUTPUT_SLOT: u32 = 0;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Identifier of a node within one graph. Rendered as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to one output slot of an earlier node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRef {
    pub node: NodeId,
    pub slot: u32,
}

impl OutputRef {
    fn new(node: NodeId, slot: u32) -> Self {
        Self { node, slot }
    }
}

/// A node input: either a literal value or a link to another node's output.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput {
    Literal(serde_json::Value),
    Link(OutputRef),
}

impl NodeInput {
    fn literal(value: impl Into<serde_json::Value>) -> Self {
        NodeInput::Literal(value.into())
    }

    /// Encode in the engine wire format; links become `["<id>", slot]`.
    fn to_json(&self) -> serde_json::Value {
        match self {
            NodeInput::Literal(value) => value.clone(),
            NodeInput::Link(link) => serde_json::json!([link.node.to_string(), link.slot]),
        }
    }
}

/// One processing step of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub class_type: String,
    /// Named inputs in emission order.
    pub inputs: Vec<(String, NodeInput)>,
}

impl GraphNode {
    /// Look up an input by name.
    pub fn input(&self, name: &str) -> Option<&NodeInput> {
        self.inputs
            .iter()
            .find(|(input_name, _)| input_name == name)
            .map(|(_, input)| input)
    }

    /// The link feeding `name`, if that input is a link.
    pub fn link(&self, name: &str) -> Option<OutputRef> {
        match self.input(name)? {
            NodeInput::Link(link) => Some(*link),
            NodeInput::Literal(_) => None,
        }
    }

    /// The literal value of `name`, if that input is a literal.
    pub fn literal(&self, name: &str) -> Option<&serde_json::Value> {
        match self.input(name)? {
            NodeInput::Literal(value) => Some(value),
            NodeInput::Link(_) => None,
        }
    }

    fn literal_str(&self, name: &str) -> Option<String> {
        self.literal(name)?.as_str().map(str::to_string)
    }

    fn literal_f64(&self, name: &str) -> Option<f64> {
        self.literal(name)?.as_f64()
    }

    fn literal_i64(&self, name: &str) -> Option<i64> {
        self.literal(name)?.as_i64()
    }

    fn literal_i32(&self, name: &str) -> Option<i32> {
        self.literal_i64(name).and_then(|v| i32::try_from(v).ok())
    }
}

/// A compiled, acyclic node graph ready for submission.
///
/// Nodes are stored in id order; the graph cannot be mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGraph {
    nodes: Vec<GraphNode>,
}

impl NodeGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.nodes.get(index)
    }

    /// All nodes of the given class type, in id order.
    pub fn nodes_of_class<'a>(&'a self, class_type: &'a str) -> impl Iterator<Item = &'a GraphNode> {
        self.nodes.iter().filter(move |n| n.class_type == class_type)
    }

    /// Serialize into the engine's API prompt document:
    /// `{"<id>": {"class_type": "...", "inputs": {...}}}`.
    pub fn to_prompt_json(&self) -> serde_json::Value {
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let inputs: serde_json::Map<String, serde_json::Value> = node
                    .inputs
                    .iter()
                    .map(|(name, input)| (name.clone(), input.to_json()))
                    .collect();
                (
                    node.id.to_string(),
                    serde_json::json!({
                        "class_type": node.class_type,
                        "inputs": inputs,
                    }),
                )
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(nodes)
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Outputs of the checkpoint loader.
#[derive(Clone, Copy)]
struct CheckpointOutputs {
    model: OutputRef,
    clip: OutputRef,
    vae: OutputRef,
}

/// The model/clip pair threaded through the adapter chain.
///
/// There is no vae field: adapters never transform the vae, so the decoder
/// always reads it straight from [`CheckpointOutputs`].
#[derive(Clone, Copy)]
struct ModelClip {
    model: OutputRef,
    clip: OutputRef,
}

/// Appends nodes with monotonically increasing ids.
#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<GraphNode>,
}

impl GraphBuilder {
    fn push(&mut self, class_type: &str, inputs: Vec<(&str, NodeInput)>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32 + 1);
        self.nodes.push(GraphNode {
            id,
            class_type: class_type.to_string(),
            inputs: inputs
                .into_iter()
                .map(|(name, input)| (name.to_string(), input))
                .collect(),
        });
        id
    }

    fn checkpoint(&mut self, ckpt_name: &str) -> CheckpointOutputs {
        let id = self.push(
            CHECKPOINT_LOADER_CLASS,
            vec![("ckpt_name", NodeInput::literal(ckpt_name))],
        );
        CheckpointOutputs {
            model: OutputRef::new(id, CHECKPOINT_MODEL_SLOT),
            clip: OutputRef::new(id, CHECKPOINT_CLIP_SLOT),
            vae: OutputRef::new(id, CHECKPOINT_VAE_SLOT),
        }
    }

    fn lora(&mut self, current: ModelClip, lora: &LoraAdapter) -> ModelClip {
        let id = self.push(
            LORA_LOADER_CLASS,
            vec![
                ("model", NodeInput::Link(current.model)),
                ("clip", NodeInput::Link(current.clip)),
                ("lora_name", NodeInput::literal(lora.name.as_str())),
                ("strength_model", NodeInput::literal(lora.strength_model)),
                ("strength_clip", NodeInput::literal(lora.strength_clip)),
            ],
        );
        ModelClip {
            model: OutputRef::new(id, LORA_MODEL_SLOT),
            clip: OutputRef::new(id, LORA_CLIP_SLOT),
        }
    }

    fn text_encode(&mut self, clip: OutputRef, text: &str) -> OutputRef {
        let id = self.push(
            CLIP_TEXT_ENCODE_CLASS,
            vec![
                ("text", NodeInput::literal(text)),
                ("clip", NodeInput::Link(clip)),
            ],
        );
        OutputRef::new(id, SINGLE_OUTPUT_SLOT)
    }

    fn empty_latent(&mut self, width: i32, height: i32, batch_size: i32) -> OutputRef {
        let id = self.push(
            EMPTY_LATENT_IMAGE_CLASS,
            vec![
                ("width", NodeInput::literal(width)),
                ("height", NodeInput::literal(height)),
                ("batch_size", NodeInput::literal(batch_size)),
            ],
        );
        OutputRef::new(id, SINGLE_OUTPUT_SLOT)
    }

    fn sampler(
        &mut self,
        model: OutputRef,
        positive: OutputRef,
        negative: OutputRef,
        latent: OutputRef,
        settings: &SamplerSettings,
    ) -> OutputRef {
        let id = self.push(
            KSAMPLER_CLASS,
            vec![
                ("model", NodeInput::Link(model)),
                ("positive", NodeInput::Link(positive)),
                ("negative", NodeInput::Link(negative)),
                ("latent_image", NodeInput::Link(latent)),
                ("seed", NodeInput::literal(settings.seed)),
                ("steps", NodeInput::literal(settings.steps)),
                ("cfg", NodeInput::literal(settings.cfg_scale)),
                ("sampler_name", NodeInput::literal(settings.sampler_name.as_str())),
                ("scheduler", NodeInput::literal(settings.scheduler.as_str())),
                ("denoise", NodeInput::literal(settings.denoise)),
            ],
        );
        OutputRef::new(id, SINGLE_OUTPUT_SLOT)
    }

    fn vae_decode(&mut self, samples: OutputRef, vae: OutputRef) -> OutputRef {
        let id = self.push(
            VAE_DECODE_CLASS,
            vec![
                ("samples", NodeInput::Link(samples)),
                ("vae", NodeInput::Link(vae)),
            ],
        );
        OutputRef::new(id, SINGLE_OUTPUT_SLOT)
    }

    fn save_image(&mut self, images: OutputRef, filename_prefix: &str) -> NodeId {
        self.push(
            SAVE_IMAGE_CLASS,
            vec![
                ("images", NodeInput::Link(images)),
                ("filename_prefix", NodeInput::literal(filename_prefix)),
            ],
        )
    }

    fn finish(self) -> NodeGraph {
        NodeGraph { nodes: self.nodes }
    }
}

/// Compile a generation spec into a node graph.
///
/// The spec is validated in full before any node is emitted. A spec with
/// N adapters always yields N + 7 nodes.
pub fn compile(spec: &GenerationSpec) -> Result<NodeGraph, CoreError> {
    spec.validate()?;

    let mut builder = GraphBuilder::default();

    let checkpoint = builder.checkpoint(&spec.checkpoint);
    let base = ModelClip {
        model: checkpoint.model,
        clip: checkpoint.clip,
    };
    let chain = spec
        .loras
        .iter()
        .fold(base, |current, lora| builder.lora(current, lora));

    let positive = builder.text_encode(chain.clip, &spec.prompt);
    let negative = builder.text_encode(chain.clip, &spec.negative_prompt);
    let latent = builder.empty_latent(spec.width, spec.height, spec.batch_size);
    let samples = builder.sampler(chain.model, positive, negative, latent, &spec.sampler);
    let image = builder.vae_decode(samples, checkpoint.vae);
    builder.save_image(image, &spec.filename_prefix);

    Ok(builder.finish())
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Output dimensions recovered from the latent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: i32,
    pub height: i32,
    pub batch_size: i32,
}

/// Human-oriented view of a compiled graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSummary {
    pub checkpoint: Option<String>,
    pub loras: Vec<LoraAdapter>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub sampler: Option<SamplerSettings>,
    pub filename_prefix: Option<String>,
}

/// Recover the generation settings from a graph by scanning node classes.
///
/// Prompt detection is positional: the first text-encode node is the
/// prompt, and a later text-encode with different text is the negative
/// prompt. Byte-identical prompts therefore report no negative prompt.
pub fn summarize(graph: &NodeGraph) -> GraphSummary {
    let mut summary = GraphSummary::default();

    for node in graph.iter() {
        match node.class_type.as_str() {
            CHECKPOINT_LOADER_CLASS => {
                summary.checkpoint = node.literal_str("ckpt_name");
            }
            LORA_LOADER_CLASS => {
                if let Some(name) = node.literal_str("lora_name") {
                    summary.loras.push(LoraAdapter {
                        name,
                        strength_model: node.literal_f64("strength_model").unwrap_or(1.0),
                        strength_clip: node.literal_f64("strength_clip").unwrap_or(1.0),
                    });
                }
            }
            CLIP_TEXT_ENCODE_CLASS => {
                if let Some(text) = node.literal_str("text") {
                    match &summary.prompt {
                        None => summary.prompt = Some(text),
                        Some(prompt) if *prompt != text => summary.negative_prompt = Some(text),
                        Some(_) => {}
                    }
                }
            }
            EMPTY_LATENT_IMAGE_CLASS => {
                if let (Some(width), Some(height)) =
                    (node.literal_i32("width"), node.literal_i32("height"))
                {
                    summary.dimensions = Some(Dimensions {
                        width,
                        height,
                        batch_size: node.literal_i32("batch_size").unwrap_or(1),
                    });
                }
            }
            KSAMPLER_CLASS => {
                let defaults = SamplerSettings::default();
                summary.sampler = Some(SamplerSettings {
                    seed: node.literal_i64("seed").unwrap_or(defaults.seed),
                    steps: node.literal_i32("steps").unwrap_or(defaults.steps),
                    cfg_scale: node.literal_f64("cfg").unwrap_or(defaults.cfg_scale),
                    sampler_name: node
                        .literal_str("sampler_name")
                        .unwrap_or(defaults.sampler_name),
                    scheduler: node.literal_str("scheduler").unwrap_or(defaults.scheduler),
                    denoise: node.literal_f64("denoise").unwrap_or(defaults.denoise),
                });
            }
            SAVE_IMAGE_CLASS => {
                summary.filename_prefix = node.literal_str("filename_prefix");
            }
            _ => {}
        }
    }

    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
