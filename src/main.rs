use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use handlers::AppState;
use services::blob_store::BlobStore;
use services::fs_store::FsBlobStore;
use services::ingest::IngestionRouter;
use services::job_queue::{JobWorkers, SqliteJobQueue};
use services::listing::ListingCache;
use services::media_engine::{FfmpegExtractor, RasterEngine};
use services::pipeline::{PipelineSettings, StageContext, register_stages};
use services::recognizer::HttpRecognizer;
use services::ref_tags::RefTagManager;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate_only) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting facesort with config: {:?}", cfg);

    // --- Ensure storage and scratch directories exist ---
    for dir in [&cfg.storage_dir, &cfg.scratch_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    // SQLx will not create the file on its own default connect options.
    if let Err(e) = fs::OpenOptions::new().create(true).append(true).open(db_path) {
        tracing::warn!("Failed to pre-create database file: {}", e);
    }

    let db = Arc::new(services::db::connect(db_url).await?);

    // --- Schema is idempotent; apply on every start ---
    services::db::apply_migrations(&db).await?;
    if migrate_only {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Wire services ---
    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(db.clone(), cfg.storage_dir.clone()));
    let queue = Arc::new(SqliteJobQueue::new(db.clone()));
    let tags = Arc::new(RefTagManager::new(store.clone()));
    let listing = Arc::new(ListingCache::new(store.clone()));
    let recognizer = Arc::new(HttpRecognizer::new(
        cfg.recognizer_url.clone(),
        cfg.recognizer_api_key.clone(),
        0.8,
    ));
    let buckets = cfg.buckets();
    let ingest = Arc::new(IngestionRouter::new(
        store.clone(),
        queue.clone(),
        buckets.clone(),
    ));

    let ctx = Arc::new(StageContext {
        store: store.clone(),
        queue: queue.clone(),
        engine: Arc::new(RasterEngine::new()),
        frames: Arc::new(FfmpegExtractor::new(cfg.scratch_dir.clone())),
        recognizer: recognizer.clone(),
        tags: tags.clone(),
        buckets,
        settings: PipelineSettings {
            compress_min_bytes: cfg.compress_min_bytes,
            thumb_bound: cfg.thumb_bound,
            video_frames: cfg.video_frames,
            detection_threshold: cfg.detection_threshold,
            confidence_threshold: cfg.confidence_threshold,
        },
    });

    // --- Spawn pipeline workers ---
    let mut workers = JobWorkers::new(db.clone(), Duration::from_millis(cfg.poll_interval_ms));
    register_stages(&mut workers, ctx);
    let handles = workers.spawn(cfg.workers);
    tracing::info!("Spawned {} pipeline workers", handles.len());

    // --- Build router ---
    let state = AppState {
        store,
        queue,
        ingest,
        tags,
        listing,
        recognizer,
        db,
        storage_dir: cfg.storage_dir.clone().into(),
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
