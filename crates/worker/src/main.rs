use std::sync::Arc;
use std::time::Duration;

use atelier_comfyui::api::ComfyUIApi;
use atelier_pipeline::assets::{FsFileOrganizer, ImageThumbnailer};
use atelier_pipeline::engine::ComfyUIEngine;
use atelier_pipeline::post_completion::PostCompletionPipeline;
use atelier_pipeline::scheduler::Scheduler;
use atelier_pipeline::store::PgGenerationRequestStore;
use atelier_worker::config::WorkerConfig;
use atelier_worker::loops::{PendingSubmitter, ProcessingSync};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long each loop gets to finish its current tick after shutdown.
const LOOP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        comfyui_api_url = %config.comfyui_api_url,
        max_concurrent = config.max_concurrent_generations,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = atelier_db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    atelier_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    atelier_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Collaborators ---
    let engine = Arc::new(ComfyUIEngine::new(
        ComfyUIApi::new(config.comfyui_api_url.clone(), config.comfyui_timeout),
        config.comfyui_output_dir.clone(),
        config.comfyui_health_timeout,
    ));
    let store = Arc::new(PgGenerationRequestStore::new(pool.clone()));
    let post_completion = PostCompletionPipeline::new(
        Arc::new(FsFileOrganizer::new(config.storage_root.clone())),
        Arc::new(ImageThumbnailer::new(config.thumbnail_max_edge)),
    );
    let mut scheduler = Scheduler::new(engine, store, post_completion);
    if let Some(timeout) = config.processing_timeout {
        tracing::info!(timeout_secs = timeout.as_secs(), "Processing timeout enabled");
        scheduler = scheduler.with_processing_timeout(timeout);
    }
    let scheduler = Arc::new(scheduler);

    // --- Tick loops ---
    let cancel = CancellationToken::new();

    let submitter = PendingSubmitter::new(
        Arc::clone(&scheduler),
        config.max_concurrent_generations,
        config.pending_poll_interval,
    );
    let submitter_cancel = cancel.clone();
    let submitter_handle = tokio::spawn(async move { submitter.run(submitter_cancel).await });

    let sync = ProcessingSync::new(Arc::clone(&scheduler), config.sync_poll_interval);
    let sync_cancel = cancel.clone();
    let sync_handle = tokio::spawn(async move { sync.run(sync_cancel).await });

    tracing::info!("Worker started");

    shutdown_signal().await;

    // --- Shutdown ---
    tracing::info!("Shutdown signal received, stopping tick loops");
    cancel.cancel();
    let _ = tokio::time::timeout(LOOP_SHUTDOWN_TIMEOUT, submitter_handle).await;
    let _ = tokio::time::timeout(LOOP_SHUTDOWN_TIMEOUT, sync_handle).await;

    pool.close().await;
    tracing::info!("Worker stopped");
}

/// Install the global subscriber. `LOG_FORMAT=json` selects JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "atelier_worker=debug,atelier_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
