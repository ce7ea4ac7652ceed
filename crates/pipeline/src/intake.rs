//! Creation of new generation requests.

use std::sync::Arc;

use atelier_core::generation::GenerationSpec;
use atelier_core::types::DbId;
use atelier_db::models::generation_request::GenerationRequest;

use crate::error::GenerationError;
use crate::store::{GenerationRequestStore, UserDirectory};

pub struct GenerationIntake {
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn GenerationRequestStore>,
}

impl GenerationIntake {
    pub fn new(users: Arc<dyn UserDirectory>, store: Arc<dyn GenerationRequestStore>) -> Self {
        Self { users, store }
    }

    /// Queue a new pending request for `user_id`.
    ///
    /// Nothing is persisted unless the user exists and the spec passes
    /// the same validation the graph compiler applies.
    pub async fn create_request(
        &self,
        user_id: DbId,
        spec: &GenerationSpec,
    ) -> Result<GenerationRequest, GenerationError> {
        if !self.users.exists(user_id).await? {
            return Err(GenerationError::NotFound {
                entity: "user",
                id: user_id,
            });
        }

        spec.validate()?;

        let request = self.store.create(user_id, spec).await?;
        tracing::info!(request_id = request.id, user_id, "Generation request queued");
        Ok(request)
    }
}
