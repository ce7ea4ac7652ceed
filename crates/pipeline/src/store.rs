//! Persistence seams for generation requests and users.

use async_trait::async_trait;
use atelier_core::generation::GenerationSpec;
use atelier_core::status::GenerationStatus;
use atelier_core::types::DbId;
use atelier_db::models::generation_request::GenerationRequest;
use atelier_db::repositories::{GenerationRequestRepo, UserRepo};
use atelier_db::DbPool;

use crate::error::GenerationError;

/// Storage for generation requests. The store is the single source of
/// truth for which requests are pending or in flight.
#[async_trait]
pub trait GenerationRequestStore: Send + Sync {
    /// Oldest pending requests first, at most `limit`.
    async fn get_pending(&self, limit: usize) -> Result<Vec<GenerationRequest>, GenerationError>;

    async fn get_processing(&self) -> Result<Vec<GenerationRequest>, GenerationError>;

    async fn count_processing(&self) -> Result<usize, GenerationError> {
        Ok(self.get_processing().await?.len())
    }

    /// Atomically persist the lifecycle fields of `request`.
    ///
    /// On success `request` is refreshed with the stored row (new version
    /// and `updated_at`). On failure it is left untouched.
    async fn save(&self, request: &mut GenerationRequest) -> Result<(), GenerationError>;

    /// Insert a new pending request.
    async fn create(
        &self,
        user_id: DbId,
        spec: &GenerationSpec,
    ) -> Result<GenerationRequest, GenerationError>;
}

/// Read-only existence check against the user store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user_id: DbId) -> Result<bool, GenerationError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`GenerationRequestStore`] over the `generation_requests` table.
#[derive(Clone)]
pub struct PgGenerationRequestStore {
    pool: DbPool,
}

impl PgGenerationRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GenerationRequestStore for PgGenerationRequestStore {
    async fn get_pending(&self, limit: usize) -> Result<Vec<GenerationRequest>, GenerationError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(GenerationRequestRepo::list_pending(&self.pool, limit).await?)
    }

    async fn get_processing(&self) -> Result<Vec<GenerationRequest>, GenerationError> {
        Ok(GenerationRequestRepo::list_processing(&self.pool).await?)
    }

    async fn count_processing(&self) -> Result<usize, GenerationError> {
        let count =
            GenerationRequestRepo::count_by_status(&self.pool, GenerationStatus::Processing).await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn save(&self, request: &mut GenerationRequest) -> Result<(), GenerationError> {
        match GenerationRequestRepo::save(&self.pool, request).await? {
            Some(stored) => {
                *request = stored;
                Ok(())
            }
            None => Err(GenerationError::Persistence(format!(
                "Generation request {} was modified concurrently (version {})",
                request.id, request.version
            ))),
        }
    }

    async fn create(
        &self,
        user_id: DbId,
        spec: &GenerationSpec,
    ) -> Result<GenerationRequest, GenerationError> {
        Ok(GenerationRequestRepo::create(&self.pool, user_id, spec).await?)
    }
}

/// [`UserDirectory`] over the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: DbPool,
}

impl PgUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn exists(&self, user_id: DbId) -> Result<bool, GenerationError> {
        Ok(UserRepo::exists(&self.pool, user_id).await?)
    }
}
