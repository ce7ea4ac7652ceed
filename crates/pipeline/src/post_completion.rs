//! Best-effort file handling that runs once the engine reports success.
//!
//! Nothing here can fail a completion: organisation falls back to the raw
//! engine paths, and thumbnail failures leave the thumbnail map empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use atelier_core::types::DbId;

use crate::assets::{FileOrganizer, Thumbnailer};

/// What a completed request ends up recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionOutputs {
    pub output_paths: Vec<String>,
    /// Source path -> thumbnail path.
    pub thumbnails: BTreeMap<String, String>,
}

pub struct PostCompletionPipeline {
    organizer: Arc<dyn FileOrganizer>,
    thumbnailer: Arc<dyn Thumbnailer>,
}

impl PostCompletionPipeline {
    pub fn new(organizer: Arc<dyn FileOrganizer>, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        Self {
            organizer,
            thumbnailer,
        }
    }

    pub async fn run(
        &self,
        request_id: DbId,
        user_id: DbId,
        raw_paths: Vec<String>,
    ) -> CompletionOutputs {
        if raw_paths.is_empty() {
            return CompletionOutputs::default();
        }

        let output_paths = match self.organizer.organize(request_id, user_id, &raw_paths).await {
            Ok(organized) => organized,
            Err(e) => {
                tracing::warn!(
                    request_id,
                    user_id,
                    error = %e,
                    "File organisation failed, keeping engine output paths",
                );
                raw_paths
            }
        };

        let thumbnails = match self.thumbnailer.thumbnail(&output_paths, request_id).await {
            Ok(thumbnails) => thumbnails,
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Thumbnail generation failed");
                BTreeMap::new()
            }
        };

        CompletionOutputs {
            output_paths,
            thumbnails,
        }
    }
}
