//! Read-only queries against the `users` table.

use atelier_core::types::DbId;
use sqlx::PgPool;

/// Provides user lookups needed by request intake.
pub struct UserRepo;

impl UserRepo {
    /// Whether a user with this id exists.
    pub async fn exists(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
    }
}
