//! Row models for the persistence layer.

pub mod generation_request;
