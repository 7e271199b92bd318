//! HTTP handlers for face-collection management.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::services::recognizer::Recognizer;

#[derive(Debug, Deserialize)]
pub struct SubjectReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct FaceReq {
    /// Base64-encoded image, with or without a `data:...;base64,` prefix.
    pub image: String,
    pub subject: String,
}

/// POST `/api/faceai/subjects` — register a new subject.
pub async fn add_subject(
    State(state): State<AppState>,
    Json(req): Json<SubjectReq>,
) -> Result<impl IntoResponse, AppError> {
    state.recognizer.add_subject(&req.name).await?;
    Ok(StatusCode::CREATED)
}

/// GET `/api/faceai/subjects` — known subjects.
pub async fn list_subjects(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let subjects = state.recognizer.list_subjects().await?;
    Ok(Json(json!({ "subjects": subjects })))
}

/// POST `/api/faceai/faces` — add an example image to a subject's face
/// collection.
pub async fn add_face(
    State(state): State<AppState>,
    Json(req): Json<FaceReq>,
) -> Result<impl IntoResponse, AppError> {
    let encoded = req
        .image
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(&req.image);
    let data = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| AppError::bad_request(format!("invalid image encoding: {err}")))?;
    state
        .recognizer
        .add_face(Bytes::from(data), &req.subject)
        .await?;
    Ok(StatusCode::CREATED)
}
