//! Recognition service boundary.
//!
//! [`HttpRecognizer`] speaks the REST dialect of the face service this
//! pipeline was built against: `x-api-key` auth, multipart image upload,
//! and a JSON body of face boxes with per-subject similarity scores. The
//! service answers "no face" with a 400 + message; that is a valid
//! classification outcome here, not a failure, and maps to an empty list.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;

use crate::models::recognition::{RawFace, RawSubject};

const NO_FACE_MESSAGE: &str = "No face is found";

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("recognition service: {0}")]
    Service(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

pub type RecognizerResult<T> = Result<T, RecognizerError>;

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Detect faces and score subject candidates for one image.
    async fn recognize(&self, image: Bytes) -> RecognizerResult<Vec<RawFace>>;

    async fn add_subject(&self, subject: &str) -> RecognizerResult<()>;

    /// Add an example image of `subject` to the face collection.
    async fn add_face(&self, image: Bytes, subject: &str) -> RecognizerResult<()>;

    async fn list_subjects(&self) -> RecognizerResult<Vec<String>>;
}

pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Passed through to the service so it drops hopeless boxes early; the
    /// pipeline applies its own stricter gate on the returned probability.
    det_prob_threshold: f32,
}

impl HttpRecognizer {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, det_prob_threshold: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            det_prob_threshold,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn image_part(image: Bytes) -> Part {
        Part::bytes(image.to_vec()).file_name("image.jpg")
    }
}

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    result: Vec<ResultEntry>,
}

#[derive(Deserialize)]
struct ResultEntry {
    #[serde(rename = "box")]
    face_box: FaceBox,
    #[serde(default)]
    subjects: Vec<RawSubject>,
}

#[derive(Deserialize)]
struct FaceBox {
    probability: f32,
}

#[derive(Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SubjectsResponse {
    #[serde(default)]
    subjects: Vec<String>,
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, image: Bytes) -> RecognizerResult<Vec<RawFace>> {
        let form = Form::new().part("file", Self::image_part(image));
        let response = self
            .client
            .post(self.url("/api/v1/recognition/recognize"))
            .header("x-api-key", &self.api_key)
            .query(&[
                ("limit", "0".to_string()),
                ("det_prob_threshold", self.det_prob_threshold.to_string()),
                ("prediction_count", "1".to_string()),
            ])
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let err: ServiceError = response.json().await.unwrap_or(ServiceError {
                message: String::new(),
            });
            if err.message.contains(NO_FACE_MESSAGE) {
                return Ok(Vec::new());
            }
            return Err(RecognizerError::Service(err.message));
        }

        let body: RecognizeResponse = response.json().await?;
        Ok(body
            .result
            .into_iter()
            .map(|entry| RawFace {
                probability: entry.face_box.probability,
                subjects: entry.subjects,
            })
            .collect())
    }

    async fn add_subject(&self, subject: &str) -> RecognizerResult<()> {
        let response = self
            .client
            .post(self.url("/api/v1/recognition/subjects"))
            .header("x-api-key", &self.api_key)
            .json(&serde_json::json!({ "subject": subject }))
            .send()
            .await?;
        if !response.status().is_success() {
            let err: ServiceError = response.json().await.unwrap_or(ServiceError {
                message: "subject creation failed".into(),
            });
            return Err(RecognizerError::Service(err.message));
        }
        Ok(())
    }

    async fn add_face(&self, image: Bytes, subject: &str) -> RecognizerResult<()> {
        let form = Form::new().part("file", Self::image_part(image));
        let response = self
            .client
            .post(self.url("/api/v1/recognition/faces"))
            .header("x-api-key", &self.api_key)
            .query(&[("subject", subject)])
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            let err: ServiceError = response.json().await.unwrap_or(ServiceError {
                message: "face registration failed".into(),
            });
            return Err(RecognizerError::Service(err.message));
        }
        Ok(())
    }

    async fn list_subjects(&self) -> RecognizerResult<Vec<String>> {
        let response = self
            .client
            .get(self.url("/api/v1/recognition/subjects"))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RecognizerError::Service("subject listing failed".into()));
        }
        let body: SubjectsResponse = response.json().await?;
        Ok(body.subjects)
    }
}
