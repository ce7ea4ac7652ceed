//! Repository for the `generation_requests` table.
//!
//! Spec columns are written once on insert. Lifecycle columns are only
//! written through [`GenerationRequestRepo::save`], which is an optimistic
//! update guarded by the row's `version`.

use atelier_core::generation::GenerationSpec;
use atelier_core::status::GenerationStatus;
use atelier_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::generation_request::GenerationRequest;

/// Column list for `generation_requests` queries.
const COLUMNS: &str = "\
    id, user_id, \
    prompt, negative_prompt, checkpoint, loras, width, height, batch_size, \
    seed, steps, cfg_scale, sampler_name, scheduler, denoise, filename_prefix, \
    status_id, prompt_id, output_paths, thumbnail_paths, error_message, \
    version, created_at, started_at, completed_at, updated_at";

/// Provides persistence operations for generation requests.
pub struct GenerationRequestRepo;

impl GenerationRequestRepo {
    /// Insert a new pending request, returning the created row.
    pub async fn create(
        pool: &PgPool,
        user_id: DbId,
        spec: &GenerationSpec,
    ) -> Result<GenerationRequest, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_requests \
                 (user_id, prompt, negative_prompt, checkpoint, loras, width, height, \
                  batch_size, seed, steps, cfg_scale, sampler_name, scheduler, denoise, \
                  filename_prefix, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRequest>(&query)
            .bind(user_id)
            .bind(&spec.prompt)
            .bind(&spec.negative_prompt)
            .bind(&spec.checkpoint)
            .bind(Json(&spec.loras))
            .bind(spec.width)
            .bind(spec.height)
            .bind(spec.batch_size)
            .bind(spec.sampler.seed)
            .bind(spec.sampler.steps)
            .bind(spec.sampler.cfg_scale)
            .bind(&spec.sampler.sampler_name)
            .bind(&spec.sampler.scheduler)
            .bind(spec.sampler.denoise)
            .bind(&spec.filename_prefix)
            .bind(GenerationStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Oldest pending requests first, at most `limit` rows.
    pub async fn list_pending(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<GenerationRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_requests \
             WHERE status_id = $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, GenerationRequest>(&query)
            .bind(GenerationStatus::Pending.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// All requests currently in flight on the engine.
    pub async fn list_processing(pool: &PgPool) -> Result<Vec<GenerationRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_requests \
             WHERE status_id = $1 \
             ORDER BY started_at ASC NULLS LAST, id ASC"
        );
        sqlx::query_as::<_, GenerationRequest>(&query)
            .bind(GenerationStatus::Processing.id())
            .fetch_all(pool)
            .await
    }

    /// Number of requests in the given status.
    pub async fn count_by_status(
        pool: &PgPool,
        status: GenerationStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM generation_requests WHERE status_id = $1")
            .bind(status.id())
            .fetch_one(pool)
            .await
    }

    /// Persist the lifecycle columns of `request`.
    ///
    /// The update only applies when the stored `version` still equals
    /// `request.version`; the returned row carries the bumped version.
    /// Returns `None` when another writer got there first.
    pub async fn save(
        pool: &PgPool,
        request: &GenerationRequest,
    ) -> Result<Option<GenerationRequest>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_requests \
             SET status_id = $3, prompt_id = $4, output_paths = $5, thumbnail_paths = $6, \
                 error_message = $7, started_at = $8, completed_at = $9, \
                 version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRequest>(&query)
            .bind(request.id)
            .bind(request.version)
            .bind(request.status_id)
            .bind(&request.prompt_id)
            .bind(&request.output_paths)
            .bind(&request.thumbnail_paths)
            .bind(&request.error_message)
            .bind(request.started_at)
            .bind(request.completed_at)
            .fetch_optional(pool)
            .await
    }
}
