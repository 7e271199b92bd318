//! HTTP handlers for album operations: upload, sync, listing, removal,
//! copy, and re-recognition. Streams object downloads and delegates all
//! classification/consistency work to the services.

use std::path::PathBuf;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::job::{JobPayload, Stage};
use crate::models::media::MediaObject;
use crate::models::tags::ObjectPath;
use crate::services::blob_store::BlobStore;
use crate::services::ingest::IngestOptions;
use crate::services::job_queue::{JobQueue, list_dead_jobs};

#[derive(Debug, Deserialize)]
pub struct SyncReq {
    pub path: PathBuf,
    #[serde(default)]
    pub remove_source: bool,
}

#[derive(Debug, Deserialize)]
pub struct ObjectReq {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct ObjectsReq {
    pub bucket: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CopyReq {
    pub bucket: String,
    pub key: String,
    /// `bucket/key` path of the object to copy from.
    pub source: String,
}

/// POST `/api/album/upload` — multipart upload of one or more files.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<MediaObject>>, AppError> {
    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.to_string()))?;
        let media = state
            .ingest
            .ingest(&name, data, IngestOptions::default())
            .await?;
        stored.push(media);
    }
    if stored.is_empty() {
        return Err(AppError::bad_request("no file field in upload"));
    }
    Ok(Json(stored))
}

/// POST `/api/album/sync` — ingest a local directory.
pub async fn sync(
    State(state): State<AppState>,
    Json(req): Json<SyncReq>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.ingest.sync_dir(&req.path, req.remove_source).await?;
    Ok(Json(report))
}

/// GET `/api/album/albums` — cached bucket listing.
pub async fn albums(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.listing.albums().await?))
}

/// GET `/api/album/photos/{bucket}` — cached object listing with tags.
pub async fn photos(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.listing.photos(&bucket).await?))
}

/// POST `/api/album/refresh` — rebuild the listing cache.
pub async fn refresh(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.listing.refresh().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/album/photo/{bucket}/{*key}` — stream one object out.
pub async fn download(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (entry, reader) = state.store.get_object_reader(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&entry.size_bytes.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Some(etag) = entry.etag.as_deref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}

/// POST `/api/album/remove` — remove one classified copy, maintaining the
/// canonical ref set.
pub async fn remove(
    State(state): State<AppState>,
    Json(req): Json<ObjectReq>,
) -> Result<impl IntoResponse, AppError> {
    state.tags.remove(&req.bucket, &req.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/api/album/removes` — best-effort batch remove; failed items are
/// reported, the rest went through.
pub async fn removes(
    State(state): State<AppState>,
    Json(req): Json<ObjectsReq>,
) -> Result<impl IntoResponse, AppError> {
    let failures = state.tags.remove_many(&req.bucket, &req.keys).await;
    Ok(Json(json!({
        "removed": req.keys.len() - failures.len(),
        "failures": failures,
    })))
}

/// POST `/api/album/copy` — reference-counted copy into a group bucket.
pub async fn copy(
    State(state): State<AppState>,
    Json(req): Json<CopyReq>,
) -> Result<impl IntoResponse, AppError> {
    let source: ObjectPath = req
        .source
        .parse()
        .map_err(|_| AppError::bad_request(format!("malformed source path `{}`", req.source)))?;
    state.tags.copy(&req.bucket, &req.key, &source).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/api/album/rerecognize` — queue a re-recognition pass for an item
/// sitting in a group bucket.
pub async fn rerecognize(
    State(state): State<AppState>,
    Json(req): Json<ObjectReq>,
) -> Result<impl IntoResponse, AppError> {
    let payload = JobPayload {
        bucket: req.bucket,
        object: req.key.clone(),
        basename: req.key,
        re_recognition: true,
        ..Default::default()
    };
    state
        .queue
        .enqueue(Stage::Recognize, &payload, Duration::ZERO)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET `/api/jobs/dead` — dead-lettered pipeline jobs.
pub async fn dead_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(list_dead_jobs(&state.db).await?))
}
