//! Route table for the album service.
//!
//! ## Structure
//! - **Album endpoints** (`/api/album/...`)
//!   - `POST /upload` — multipart upload into the pipeline
//!   - `POST /sync` — ingest a local directory
//!   - `GET  /albums`, `GET /photos/{bucket}` — cached listings
//!   - `GET  /photo/{bucket}/{*key}` — stream an object out
//!   - `POST /refresh` — rebuild the listing cache
//!   - `POST /remove`, `POST /removes`, `POST /copy` — ref-counted moves
//!   - `POST /rerecognize` — queue a re-recognition pass
//! - **Face endpoints** (`/api/faceai/...`): subject and collection management
//! - **Operations**: `/api/jobs/dead`, `/healthz`, `/readyz`
//!
//! The wildcard `*key` allows nested keys like `thumb/IMG__1.jpg`.

use crate::handlers::{
    AppState,
    album_handlers::{
        albums, copy, dead_jobs, download, photos, refresh, remove, removes, rerecognize, sync,
        upload,
    },
    face_handlers::{add_face, add_subject, list_subjects},
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router carrying the shared [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // album pipeline
        .route("/api/album/upload", post(upload))
        .route("/api/album/sync", post(sync))
        .route("/api/album/albums", get(albums))
        .route("/api/album/photos/{bucket}", get(photos))
        .route("/api/album/photo/{bucket}/{*key}", get(download))
        .route("/api/album/refresh", post(refresh))
        .route("/api/album/remove", post(remove))
        .route("/api/album/removes", post(removes))
        .route("/api/album/copy", post(copy))
        .route("/api/album/rerecognize", post(rerecognize))
        // operations
        .route("/api/jobs/dead", get(dead_jobs))
        // face collection
        .route("/api/faceai/subjects", post(add_subject).get(list_subjects))
        .route("/api/faceai/faces", post(add_face))
}
