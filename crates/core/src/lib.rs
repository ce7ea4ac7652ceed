//! Domain core for image generation orchestration.
//!
//! Pure logic with no I/O: generation parameters and their validation,
//! the node-graph compiler, and the request lifecycle state machine.

pub mod error;
pub mod generation;
pub mod graph;
pub mod status;
pub mod types;
