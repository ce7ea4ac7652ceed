//! ComfyUI REST client library.
//!
//! Provides HTTP API wrappers with per-call timeouts and typed parsing of
//! the history and queue documents used to reconcile execution status.

pub mod api;
pub mod history;
