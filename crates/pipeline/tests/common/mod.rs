//! In-memory fakes of every orchestration collaborator.
//!
//! Each fake records the calls it receives so tests can assert on side
//! effects as well as on returned values.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use atelier_core::generation::{GenerationSpec, LoraAdapter, SamplerSettings};
use atelier_core::graph::NodeGraph;
use atelier_core::status::GenerationStatus;
use atelier_core::types::DbId;
use atelier_db::models::generation_request::GenerationRequest;
use atelier_pipeline::assets::{AssetError, FileOrganizer, Thumbnailer};
use atelier_pipeline::engine::{EngineReport, RenderEngine};
use atelier_pipeline::error::GenerationError;
use atelier_pipeline::lifecycle::LifecycleController;
use atelier_pipeline::post_completion::PostCompletionPipeline;
use atelier_pipeline::scheduler::Scheduler;
use atelier_pipeline::store::{GenerationRequestStore, UserDirectory};
use chrono::{Duration, TimeZone, Utc};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn valid_spec() -> GenerationSpec {
    GenerationSpec {
        prompt: "a cat".to_string(),
        negative_prompt: String::new(),
        checkpoint: "sdxl_base.safetensors".to_string(),
        loras: vec![LoraAdapter {
            name: "detail.safetensors".to_string(),
            strength_model: 0.8,
            strength_clip: 0.8,
        }],
        width: 832,
        height: 1216,
        batch_size: 1,
        sampler: SamplerSettings::default(),
        filename_prefix: "cats".to_string(),
    }
}

/// A pending request created `minutes` after a fixed epoch.
pub fn pending_request(id: DbId, minutes: i64) -> GenerationRequest {
    let epoch = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    GenerationRequest::new_pending(id, 1, &valid_spec(), epoch + Duration::minutes(minutes))
}

/// A request already submitted to the engine under `prompt_id`.
pub fn processing_request(id: DbId, prompt_id: &str) -> GenerationRequest {
    let mut request = pending_request(id, 0);
    request.status_id = GenerationStatus::Processing.id();
    request.prompt_id = Some(prompt_id.to_string());
    request.started_at = Some(request.created_at);
    request
}

pub fn with_status(mut request: GenerationRequest, status: GenerationStatus) -> GenerationRequest {
    request.status_id = status.id();
    request
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Scriptable [`RenderEngine`]. Completed reports carry their outputs as a
/// JSON array of paths, which `list_output_files` returns verbatim.
pub struct FakeEngine {
    healthy: AtomicBool,
    next_prompt: AtomicI64,
    submit_error: Mutex<Option<String>>,
    poll_error: Mutex<Option<String>>,
    cancel_error: Mutex<Option<String>>,
    reports: Mutex<HashMap<String, EngineReport>>,
    pub submitted: Mutex<Vec<NodeGraph>>,
    pub polled: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub listed: Mutex<usize>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            next_prompt: AtomicI64::new(1),
            submit_error: Mutex::new(None),
            poll_error: Mutex::new(None),
            cancel_error: Mutex::new(None),
            reports: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            polled: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            listed: Mutex::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_submissions(&self, message: &str) {
        *self.submit_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_polls(&self, message: &str) {
        *self.poll_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_cancels(&self, message: &str) {
        *self.cancel_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn report(&self, prompt_id: &str, report: EngineReport) {
        self.reports
            .lock()
            .unwrap()
            .insert(prompt_id.to_string(), report);
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn submit(&self, graph: &NodeGraph) -> Result<String, GenerationError> {
        if let Some(message) = self.submit_error.lock().unwrap().clone() {
            return Err(GenerationError::Connection(message));
        }
        self.submitted.lock().unwrap().push(graph.clone());
        let n = self.next_prompt.fetch_add(1, Ordering::SeqCst);
        Ok(format!("prompt-{n}"))
    }

    async fn poll_status(&self, correlation_id: &str) -> Result<EngineReport, GenerationError> {
        self.polled.lock().unwrap().push(correlation_id.to_string());
        if let Some(message) = self.poll_error.lock().unwrap().clone() {
            return Err(GenerationError::Connection(message));
        }
        Ok(self
            .reports
            .lock()
            .unwrap()
            .get(correlation_id)
            .cloned()
            .unwrap_or_else(EngineReport::queued))
    }

    async fn cancel(&self, correlation_id: &str) -> Result<bool, GenerationError> {
        self.cancelled.lock().unwrap().push(correlation_id.to_string());
        match self.cancel_error.lock().unwrap().clone() {
            Some(message) => Err(GenerationError::Connection(message)),
            None => Ok(true),
        }
    }

    fn list_output_files(&self, outputs: &serde_json::Value) -> Vec<String> {
        *self.listed.lock().unwrap() += 1;
        outputs
            .as_array()
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`GenerationRequestStore`] over a vector, with the same optimistic
/// version check as the database.
pub struct InMemoryStore {
    rows: Mutex<Vec<GenerationRequest>>,
    next_id: AtomicI64,
    fail_saves: AtomicBool,
    fail_next_save: AtomicBool,
    pub saves: Mutex<usize>,
}

impl InMemoryStore {
    pub fn new(rows: Vec<GenerationRequest>) -> Self {
        let next_id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        Self {
            rows: Mutex::new(rows),
            next_id: AtomicI64::new(next_id),
            fail_saves: AtomicBool::new(false),
            fail_next_save: AtomicBool::new(false),
            saves: Mutex::new(0),
        }
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    /// Only the next save fails; later saves go through.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, id: DbId) -> GenerationRequest {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .expect("request exists")
    }

    pub fn status_of(&self, id: DbId) -> GenerationStatus {
        self.get(id).status().unwrap()
    }

    pub fn ids_with_status(&self, status: GenerationStatus) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status_id == status.id())
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn with_status(&self, status: GenerationStatus) -> Vec<GenerationRequest> {
        let mut rows: Vec<GenerationRequest> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status_id == status.id())
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        rows
    }
}

#[async_trait]
impl GenerationRequestStore for InMemoryStore {
    async fn get_pending(&self, limit: usize) -> Result<Vec<GenerationRequest>, GenerationError> {
        let mut rows = self.with_status(GenerationStatus::Pending);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_processing(&self) -> Result<Vec<GenerationRequest>, GenerationError> {
        Ok(self.with_status(GenerationStatus::Processing))
    }

    async fn save(&self, request: &mut GenerationRequest) -> Result<(), GenerationError> {
        if self.fail_saves.load(Ordering::SeqCst) || self.fail_next_save.swap(false, Ordering::SeqCst)
        {
            return Err(GenerationError::Persistence("store unavailable".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        let stored = rows
            .iter_mut()
            .find(|r| r.id == request.id)
            .ok_or_else(|| GenerationError::Persistence(format!("no row {}", request.id)))?;
        if stored.version != request.version {
            return Err(GenerationError::Persistence(format!(
                "version conflict on {}",
                request.id
            )));
        }

        let mut next = request.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        *stored = next.clone();
        *request = next;
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    async fn create(
        &self,
        user_id: DbId,
        spec: &GenerationSpec,
    ) -> Result<GenerationRequest, GenerationError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = GenerationRequest::new_pending(id, user_id, spec, Utc::now());
        self.rows.lock().unwrap().push(request.clone());
        Ok(request)
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub struct FakeUsers {
    known: Vec<DbId>,
}

impl FakeUsers {
    pub fn new(known: Vec<DbId>) -> Self {
        Self { known }
    }
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn exists(&self, user_id: DbId) -> Result<bool, GenerationError> {
        Ok(self.known.contains(&user_id))
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Maps `x.png` to `/storage/<user>/<request>/<i>_x.png` without touching
/// the filesystem.
pub struct FakeOrganizer {
    fail: bool,
    pub calls: Mutex<Vec<(DbId, DbId, Vec<String>)>>,
}

impl FakeOrganizer {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl FileOrganizer for FakeOrganizer {
    async fn organize(
        &self,
        request_id: DbId,
        user_id: DbId,
        paths: &[String],
    ) -> Result<Vec<String>, AssetError> {
        self.calls
            .lock()
            .unwrap()
            .push((request_id, user_id, paths.to_vec()));
        if self.fail {
            return Err(AssetError::Io {
                path: "/storage".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        Ok(paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let name = Path::new(p).file_name().unwrap().to_string_lossy();
                format!("/storage/{user_id}/{request_id}/{i}_{name}")
            })
            .collect())
    }
}

pub struct FakeThumbnailer {
    fail: bool,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl FakeThumbnailer {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Thumbnailer for FakeThumbnailer {
    async fn thumbnail(
        &self,
        paths: &[String],
        _request_id: DbId,
    ) -> Result<BTreeMap<String, String>, AssetError> {
        self.calls.lock().unwrap().push(paths.to_vec());
        if self.fail {
            return Err(AssetError::InvalidPath(paths.join(",")));
        }
        Ok(paths
            .iter()
            .map(|p| (p.clone(), format!("{p}.thumb.png")))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Collaborators wired together the way the worker wires the real ones.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub store: Arc<InMemoryStore>,
    pub organizer: Arc<FakeOrganizer>,
    pub thumbnailer: Arc<FakeThumbnailer>,
}

impl Harness {
    pub fn new(rows: Vec<GenerationRequest>) -> Self {
        Self::with_assets(rows, FakeOrganizer::new(), FakeThumbnailer::new())
    }

    pub fn with_assets(
        rows: Vec<GenerationRequest>,
        organizer: FakeOrganizer,
        thumbnailer: FakeThumbnailer,
    ) -> Self {
        Self {
            engine: Arc::new(FakeEngine::new()),
            store: Arc::new(InMemoryStore::new(rows)),
            organizer: Arc::new(organizer),
            thumbnailer: Arc::new(thumbnailer),
        }
    }

    pub fn post_completion(&self) -> PostCompletionPipeline {
        PostCompletionPipeline::new(self.organizer.clone(), self.thumbnailer.clone())
    }

    pub fn lifecycle(&self) -> LifecycleController {
        LifecycleController::new(
            self.engine.clone(),
            self.store.clone(),
            self.post_completion(),
        )
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.engine.clone(),
            self.store.clone(),
            self.post_completion(),
        )
    }
}
