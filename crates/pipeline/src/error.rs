use atelier_comfyui::api::ComfyUIApiError;
use atelier_core::error::CoreError;
use atelier_core::types::DbId;

/// Errors surfaced by the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Bad generation parameters or an illegal lifecycle transition.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The rendering engine could not be reached or rejected the call.
    #[error("Engine connection error: {0}")]
    Connection(String),

    /// The request store failed or lost an optimistic update race.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },
}

impl From<CoreError> for GenerationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => GenerationError::Validation(msg),
            CoreError::NotFound { entity, id } => GenerationError::NotFound { entity, id },
        }
    }
}

impl From<sqlx::Error> for GenerationError {
    fn from(err: sqlx::Error) -> Self {
        GenerationError::Persistence(err.to_string())
    }
}

impl From<ComfyUIApiError> for GenerationError {
    fn from(err: ComfyUIApiError) -> Self {
        GenerationError::Connection(err.to_string())
    }
}
