//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod generation_request_repo;
pub mod user_repo;

pub use generation_request_repo::GenerationRequestRepo;
pub use user_repo::UserRepo;
