//! Shared doubles for service tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::models::job::{JobPayload, Stage};
use crate::models::recognition::RawFace;
use crate::services::job_queue::{JobQueue, QueueResult};
use crate::services::media_engine::{EngineResult, FrameExtractor};
use crate::services::recognizer::{Recognizer, RecognizerResult};

/// Queue double that records enqueues instead of running them.
#[derive(Default)]
pub(crate) struct RecordingQueue {
    pub jobs: Mutex<Vec<(Stage, JobPayload)>>,
}

impl RecordingQueue {
    /// Pop the oldest recorded job, if any.
    pub async fn pop(&self) -> Option<(Stage, JobPayload)> {
        let mut jobs = self.jobs.lock().await;
        if jobs.is_empty() {
            None
        } else {
            Some(jobs.remove(0))
        }
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(
        &self,
        stage: Stage,
        payload: &JobPayload,
        _delay: Duration,
    ) -> QueueResult<()> {
        self.jobs.lock().await.push((stage, payload.clone()));
        Ok(())
    }
}

/// Recognizer double replaying a scripted sequence of responses; the last
/// response repeats once the script runs out.
pub(crate) struct ScriptedRecognizer {
    responses: Mutex<VecDeque<Vec<RawFace>>>,
    last: Mutex<Vec<RawFace>>,
}

impl ScriptedRecognizer {
    pub fn new(responses: Vec<Vec<RawFace>>) -> Self {
        Self {
            last: Mutex::new(responses.last().cloned().unwrap_or_default()),
            responses: Mutex::new(responses.into()),
        }
    }

    pub fn single(faces: Vec<RawFace>) -> Self {
        Self::new(vec![faces])
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _image: Bytes) -> RecognizerResult<Vec<RawFace>> {
        match self.responses.lock().await.pop_front() {
            Some(faces) => Ok(faces),
            None => Ok(self.last.lock().await.clone()),
        }
    }

    async fn add_subject(&self, _subject: &str) -> RecognizerResult<()> {
        Ok(())
    }

    async fn add_face(&self, _image: Bytes, _subject: &str) -> RecognizerResult<()> {
        Ok(())
    }

    async fn list_subjects(&self) -> RecognizerResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Frame extractor double handing back preset frames.
pub(crate) struct StaticFrames(pub Vec<Bytes>);

#[async_trait]
impl FrameExtractor for StaticFrames {
    async fn extract_frames(&self, _video: Bytes, count: usize) -> EngineResult<Vec<Bytes>> {
        Ok(self.0.iter().take(count).cloned().collect())
    }
}

/// A real encoded JPEG for engine-backed tests.
pub(crate) fn tiny_jpeg(width: u32, height: u32) -> Bytes {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 60]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .unwrap();
    Bytes::from(out)
}

pub(crate) fn face(probability: f32, subjects: &[(&str, f32)]) -> RawFace {
    RawFace {
        probability,
        subjects: subjects
            .iter()
            .map(|(s, sim)| crate::models::recognition::RawSubject {
                subject: s.to_string(),
                similarity: *sim,
            })
            .collect(),
    }
}
