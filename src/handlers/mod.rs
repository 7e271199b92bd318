//! HTTP handlers. This layer is deliberately thin: extract, delegate to a
//! service, convert errors to `AppError`.

pub mod album_handlers;
pub mod face_handlers;
pub mod health_handlers;

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::blob_store::BlobStore;
use crate::services::ingest::IngestionRouter;
use crate::services::job_queue::JobQueue;
use crate::services::listing::ListingCache;
use crate::services::recognizer::Recognizer;
use crate::services::ref_tags::RefTagManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub ingest: Arc<IngestionRouter>,
    pub tags: Arc<RefTagManager>,
    pub listing: Arc<ListingCache>,
    pub recognizer: Arc<dyn Recognizer>,
    pub db: Arc<SqlitePool>,
    pub storage_dir: PathBuf,
}
