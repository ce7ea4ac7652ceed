//! Generation request orchestration.
//!
//! Turns pending [`GenerationRequest`](atelier_db::models::generation_request::GenerationRequest)
//! rows into engine executions under a concurrency cap, and reconciles
//! engine status back into the store. All external systems sit behind the
//! collaborator traits in [`engine`], [`store`] and [`assets`].

pub mod assets;
pub mod engine;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod post_completion;
pub mod scheduler;
pub mod store;
