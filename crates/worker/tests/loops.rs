//! Integration tests for the worker tick loops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atelier_core::generation::GenerationSpec;
use atelier_core::graph::NodeGraph;
use atelier_core::types::DbId;
use atelier_db::models::generation_request::GenerationRequest;
use atelier_pipeline::assets::{AssetError, FileOrganizer, Thumbnailer};
use atelier_pipeline::engine::{EngineReport, RenderEngine};
use atelier_pipeline::error::GenerationError;
use atelier_pipeline::post_completion::PostCompletionPipeline;
use atelier_pipeline::scheduler::Scheduler;
use atelier_pipeline::store::GenerationRequestStore;
use atelier_worker::loops::{PendingSubmitter, ProcessingSync};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Engine that counts health probes and is otherwise idle.
#[derive(Default)]
struct CountingEngine {
    health_checks: AtomicUsize,
}

#[async_trait]
impl RenderEngine for CountingEngine {
    async fn health(&self) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn submit(&self, _graph: &NodeGraph) -> Result<String, GenerationError> {
        Err(GenerationError::Connection("not expected".into()))
    }

    async fn poll_status(&self, _id: &str) -> Result<EngineReport, GenerationError> {
        Ok(EngineReport::queued())
    }

    async fn cancel(&self, _id: &str) -> Result<bool, GenerationError> {
        Ok(true)
    }

    fn list_output_files(&self, _outputs: &serde_json::Value) -> Vec<String> {
        Vec::new()
    }
}

/// Store with no requests that counts processing scans.
#[derive(Default)]
struct EmptyStore {
    processing_scans: AtomicUsize,
}

#[async_trait]
impl GenerationRequestStore for EmptyStore {
    async fn get_pending(&self, _limit: usize) -> Result<Vec<GenerationRequest>, GenerationError> {
        Ok(Vec::new())
    }

    async fn get_processing(&self) -> Result<Vec<GenerationRequest>, GenerationError> {
        self.processing_scans.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn save(&self, _request: &mut GenerationRequest) -> Result<(), GenerationError> {
        Ok(())
    }

    async fn create(
        &self,
        _user_id: DbId,
        _spec: &GenerationSpec,
    ) -> Result<GenerationRequest, GenerationError> {
        Err(GenerationError::Persistence("not expected".into()))
    }
}

struct NoAssets;

#[async_trait]
impl FileOrganizer for NoAssets {
    async fn organize(
        &self,
        _request_id: DbId,
        _user_id: DbId,
        paths: &[String],
    ) -> Result<Vec<String>, AssetError> {
        Ok(paths.to_vec())
    }
}

#[async_trait]
impl Thumbnailer for NoAssets {
    async fn thumbnail(
        &self,
        _paths: &[String],
        _request_id: DbId,
    ) -> Result<BTreeMap<String, String>, AssetError> {
        Ok(BTreeMap::new())
    }
}

fn scheduler(engine: Arc<CountingEngine>, store: Arc<EmptyStore>) -> Arc<Scheduler> {
    let post_completion = PostCompletionPipeline::new(Arc::new(NoAssets), Arc::new(NoAssets));
    Arc::new(Scheduler::new(engine, store, post_completion))
}

// ---------------------------------------------------------------------------
// Test: loops tick and stop on cancel
// ---------------------------------------------------------------------------

/// The pending loop probes the engine each tick and exits on cancel.
#[tokio::test]
async fn pending_submitter_ticks_until_cancelled() {
    let engine = Arc::new(CountingEngine::default());
    let store = Arc::new(EmptyStore::default());
    let submitter = PendingSubmitter::new(
        scheduler(engine.clone(), store),
        2,
        Duration::from_millis(10),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { submitter.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop stops after cancel")
        .unwrap();

    assert!(engine.health_checks.load(Ordering::SeqCst) >= 2);
}

/// The sync loop scans processing requests each tick and exits on cancel.
#[tokio::test]
async fn processing_sync_ticks_until_cancelled() {
    let engine = Arc::new(CountingEngine::default());
    let store = Arc::new(EmptyStore::default());
    let sync = ProcessingSync::new(scheduler(engine, store.clone()), Duration::from_millis(10));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { sync.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop stops after cancel")
        .unwrap();

    assert!(store.processing_scans.load(Ordering::SeqCst) >= 2);
}

/// A token cancelled before start stops the loop immediately.
#[tokio::test]
async fn cancelled_token_stops_loop_immediately() {
    let store = Arc::new(EmptyStore::default());
    let sync = ProcessingSync::new(
        scheduler(Arc::new(CountingEngine::default()), store),
        Duration::from_secs(3600),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), sync.run(cancel))
        .await
        .expect("loop exits without ticking");
}
