//! Stage handlers for the media pipeline.
//!
//! Ordering is an explicit chain: every stage enqueues its successor after
//! finishing, so a stage never runs against missing predecessor output.
//! Images flow compress → thumbnail → recognize → cleanup; videos run the
//! single `video` stage. A handler reports failure by returning an error,
//! which dead-letters the job; handlers never reschedule themselves.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::config::BucketNames;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::job::{JobPayload, Stage};
use crate::models::media::{Variant, origin_timestamp};
use crate::models::recognition::RecognitionResult;
use crate::models::tags::{ObjectPath, TAG_HEIGHT, TAG_WIDTH, TagSet};
use crate::services::blob_store::{BlobStore, StoreError};
use crate::services::classify::classify;
use crate::services::job_queue::{JobQueue, JobWorkers, StageHandler};
use crate::services::media_engine::{FrameExtractor, ImageEngine, Thumb};
use crate::services::recognizer::Recognizer;
use crate::services::ref_tags::RefTagManager;

/// Tunables shared by all stages.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub compress_min_bytes: i64,
    pub thumb_bound: u32,
    pub video_frames: usize,
    pub detection_threshold: f32,
    pub confidence_threshold: f32,
}

/// Everything a stage handler needs, shared across the pool.
pub struct StageContext {
    pub store: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub engine: Arc<dyn ImageEngine>,
    pub frames: Arc<dyn FrameExtractor>,
    pub recognizer: Arc<dyn Recognizer>,
    pub tags: Arc<RefTagManager>,
    pub buckets: BucketNames,
    pub settings: PipelineSettings,
}

impl StageContext {
    fn mini_key(payload: &JobPayload) -> String {
        payload
            .mini_object
            .clone()
            .unwrap_or_else(|| Variant::Compressed.key_for(&payload.basename))
    }

    fn thumb_key(payload: &JobPayload) -> String {
        payload
            .thumb_object
            .clone()
            .unwrap_or_else(|| Variant::Thumbnail.key_for(&payload.basename))
    }

    async fn enqueue(&self, stage: Stage, payload: &JobPayload) -> PipelineResult<()> {
        self.queue.enqueue(stage, payload, Duration::ZERO).await?;
        Ok(())
    }

    /// Tags written on every derived thumbnail: the back-reference to its
    /// canonical object, the origin timestamp when the basename yields
    /// one, and the source dimensions.
    fn thumb_tags(canonical: &ObjectPath, basename: &str, thumb: &Thumb) -> TagSet {
        let mut tags = TagSet::new();
        tags.set_source(canonical);
        if let Some(ms) = origin_timestamp(basename) {
            tags.set_origin_time(ms);
        }
        tags.set(TAG_WIDTH, thumb.source_width.to_string());
        tags.set(TAG_HEIGHT, thumb.source_height.to_string());
        tags
    }

    async fn remove_local_source(&self, payload: &JobPayload) -> PipelineResult<()> {
        if payload.remove_source {
            if let Some(path) = &payload.source_path {
                fs::remove_file(path).await.map_err(PipelineError::external)?;
                info!(path = %path.display(), "removed synced local file");
            }
        }
        Ok(())
    }
}

/// Register every stage handler on a worker pool.
pub fn register_stages(workers: &mut JobWorkers, ctx: Arc<StageContext>) {
    workers.register(Arc::new(CompressStage(ctx.clone())));
    workers.register(Arc::new(ThumbnailStage(ctx.clone())));
    workers.register(Arc::new(RecognizeStage(ctx.clone())));
    workers.register(Arc::new(VideoStage(ctx.clone())));
    workers.register(Arc::new(CleanupStage(ctx)));
}

/// Re-encode large sources into a `min/` variant and point the source's
/// `mini` tag at it. Small or already-compressed sources pass through.
pub struct CompressStage(pub Arc<StageContext>);

#[async_trait]
impl StageHandler for CompressStage {
    fn stage(&self) -> Stage {
        Stage::Compress
    }

    async fn execute(&self, payload: JobPayload) -> Result<(), PipelineError> {
        let ctx = &self.0;
        let mini_key = StageContext::mini_key(&payload);

        let mut source_tags = ctx
            .store
            .get_object_tagging(&payload.bucket, &payload.object)
            .await?;
        if source_tags.mini().is_some() {
            debug!(object = %payload.object, "already compressed, skipping");
            return ctx.enqueue(Stage::Thumbnail, &payload).await;
        }

        let stat = ctx.store.stat_object(&payload.bucket, &payload.object).await?;
        if stat.size_bytes < ctx.settings.compress_min_bytes {
            debug!(object = %payload.object, size = stat.size_bytes, "below compression floor");
            return ctx.enqueue(Stage::Thumbnail, &payload).await;
        }

        let data = ctx.store.get_object(&payload.bucket, &payload.object).await?;
        match ctx
            .engine
            .compress(data)
            .await
            .map_err(PipelineError::external)?
        {
            Some(smaller) => {
                ctx.store.put_object(&payload.bucket, &mini_key, smaller).await?;
                source_tags.set_mini(&ObjectPath::new(&payload.bucket, &mini_key));
                ctx.store
                    .set_object_tagging(&payload.bucket, &payload.object, &source_tags)
                    .await?;
                info!(object = %payload.object, mini = %mini_key, "compressed");
            }
            None => debug!(object = %payload.object, "format has no lossy re-encode"),
        }

        ctx.enqueue(Stage::Thumbnail, &payload).await
    }
}

/// Render the `thumb/` variant and tag it with its back-reference, origin
/// timestamp, and source dimensions.
pub struct ThumbnailStage(pub Arc<StageContext>);

#[async_trait]
impl StageHandler for ThumbnailStage {
    fn stage(&self) -> Stage {
        Stage::Thumbnail
    }

    async fn execute(&self, payload: JobPayload) -> Result<(), PipelineError> {
        let ctx = &self.0;
        let thumb_key = StageContext::thumb_key(&payload);

        let data = ctx.store.get_object(&payload.bucket, &payload.object).await?;
        let thumb = ctx
            .engine
            .thumbnail(data, ctx.settings.thumb_bound)
            .await
            .map_err(PipelineError::external)?;

        let canonical = ObjectPath::new(&payload.bucket, &payload.object);
        let tags = StageContext::thumb_tags(&canonical, &payload.basename, &thumb);
        ctx.store
            .put_object(&payload.bucket, &thumb_key, thumb.data)
            .await?;
        ctx.store
            .set_object_tagging(&payload.bucket, &thumb_key, &tags)
            .await?;

        info!(object = %payload.object, thumb = %thumb_key, "thumbnailed");
        ctx.enqueue(Stage::Recognize, &payload).await
    }
}

/// Recognize faces, classify, and fan the thumbnail out into the target
/// buckets through the tag manager.
pub struct RecognizeStage(pub Arc<StageContext>);

impl RecognizeStage {
    async fn recognition_input(&self, payload: &JobPayload) -> PipelineResult<bytes::Bytes> {
        let ctx = &self.0;
        if payload.re_recognition {
            return Ok(ctx.store.get_object(&payload.bucket, &payload.object).await?);
        }
        // Prefer the compressed variant; large sources cost the recognition
        // service real time.
        match ctx
            .store
            .get_object(&payload.bucket, &StageContext::mini_key(payload))
            .await
        {
            Ok(data) => Ok(data),
            Err(StoreError::ObjectNotFound { .. }) => {
                Ok(ctx.store.get_object(&payload.bucket, &payload.object).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn recognize(&self, payload: &JobPayload) -> PipelineResult<RecognitionResult> {
        let ctx = &self.0;
        let data = self.recognition_input(payload).await?;
        let faces = ctx
            .recognizer
            .recognize(data)
            .await
            .map_err(PipelineError::external)?;
        Ok(RecognitionResult::from_faces(
            &faces,
            ctx.settings.detection_threshold,
            ctx.settings.confidence_threshold,
        ))
    }

    /// Re-triage an item already sitting in a group bucket. Confident
    /// subjects still fan out; the item leaves its current bucket only when
    /// every face is confident, so manual re-triage is preserved.
    async fn re_recognize(&self, payload: JobPayload) -> Result<(), PipelineError> {
        let ctx = &self.0;
        let result = self.recognize(&payload).await?;
        let targets = classify(&result, true, &ctx.buckets);

        let current = ObjectPath::new(&payload.bucket, &payload.object);
        for target in &targets {
            ctx.tags.copy(target, &payload.object, &current).await?;
        }

        if result.all_confident() {
            ctx.tags.remove(&payload.bucket, &payload.object).await?;
            info!(object = %current, ?targets, "re-recognition complete, item re-homed");
        } else {
            info!(object = %current, ?targets, "re-recognition left item in place");
        }
        Ok(())
    }
}

#[async_trait]
impl StageHandler for RecognizeStage {
    fn stage(&self) -> Stage {
        Stage::Recognize
    }

    async fn execute(&self, payload: JobPayload) -> Result<(), PipelineError> {
        if payload.re_recognition {
            return self.re_recognize(payload).await;
        }

        let ctx = &self.0;
        let result = self.recognize(&payload).await?;
        let targets = classify(&result, false, &ctx.buckets);

        let thumb_path = ObjectPath::new(&payload.bucket, &StageContext::thumb_key(&payload));
        for target in &targets {
            ctx.tags.copy(target, &payload.basename, &thumb_path).await?;
        }

        info!(
            object = %payload.object,
            faces = result.matches.len(),
            ?targets,
            "classified"
        );
        ctx.enqueue(Stage::Cleanup, &payload).await
    }
}

/// Sample frames from a video, recognize each, and classify per subject
/// using the earliest frame that subject appears in as its thumbnail.
pub struct VideoStage(pub Arc<StageContext>);

impl VideoStage {
    async fn upload_frame_thumb(
        &self,
        payload: &JobPayload,
        frame: bytes::Bytes,
        name: &str,
    ) -> PipelineResult<ObjectPath> {
        let ctx = &self.0;
        let thumb = ctx
            .engine
            .thumbnail(frame, ctx.settings.thumb_bound)
            .await
            .map_err(PipelineError::external)?;
        let thumb_key = format!("thumb/{name}");
        let canonical = ObjectPath::new(&payload.bucket, &payload.object);
        let tags = StageContext::thumb_tags(&canonical, &payload.basename, &thumb);
        ctx.store
            .put_object(&payload.bucket, &thumb_key, thumb.data)
            .await?;
        ctx.store
            .set_object_tagging(&payload.bucket, &thumb_key, &tags)
            .await?;
        Ok(ObjectPath::new(&payload.bucket, thumb_key))
    }
}

#[async_trait]
impl StageHandler for VideoStage {
    fn stage(&self) -> Stage {
        Stage::Video
    }

    async fn execute(&self, payload: JobPayload) -> Result<(), PipelineError> {
        let ctx = &self.0;
        let data = ctx.store.get_object(&payload.bucket, &payload.object).await?;
        let frames = ctx
            .frames
            .extract_frames(data, ctx.settings.video_frames)
            .await
            .map_err(PipelineError::external)?;
        if frames.is_empty() {
            return Err(PipelineError::external("no frames sampled from video"));
        }

        // Earliest frame per confident subject; one aggregate verdict for
        // the rest.
        let mut subject_frames: BTreeMap<String, usize> = BTreeMap::new();
        let mut any_face = false;
        let mut any_unconfident = false;
        for (idx, frame) in frames.iter().enumerate() {
            let faces = ctx
                .recognizer
                .recognize(frame.clone())
                .await
                .map_err(PipelineError::external)?;
            let result = RecognitionResult::from_faces(
                &faces,
                ctx.settings.detection_threshold,
                ctx.settings.confidence_threshold,
            );
            if result.recognized {
                any_face = true;
            }
            for m in &result.matches {
                match (&m.subject, m.confident) {
                    (Some(subject), true) => {
                        subject_frames.entry(subject.clone()).or_insert(idx);
                    }
                    _ => any_unconfident = true,
                }
            }
        }

        let stem = payload
            .basename
            .rsplit_once('.')
            .map(|(s, _)| s)
            .unwrap_or(&payload.basename);

        for (subject, idx) in &subject_frames {
            let name = format!("{stem}_{subject}.jpg");
            let thumb_path = self
                .upload_frame_thumb(&payload, frames[*idx].clone(), &name)
                .await?;
            ctx.tags
                .copy(&ctx.buckets.subject(subject), &name, &thumb_path)
                .await?;
        }

        if !any_face || any_unconfident {
            let name = format!("{stem}.jpg");
            let thumb_path = self
                .upload_frame_thumb(&payload, frames[0].clone(), &name)
                .await?;
            let target = if any_face {
                ctx.buckets.need_recognition()
            } else {
                ctx.buckets.other()
            };
            ctx.tags.copy(&target, &name, &thumb_path).await?;
        }

        info!(
            object = %payload.object,
            subjects = subject_frames.len(),
            any_face,
            "video classified"
        );
        ctx.remove_local_source(&payload).await
    }
}

/// Drop the intake copy of the thumbnail once classification has fanned
/// out. The removal goes through the tag manager so the canonical's ref
/// set stays truthful; the `min/` variant stays behind as the browsing
/// substitute named by the source's `mini` tag.
pub struct CleanupStage(pub Arc<StageContext>);

#[async_trait]
impl StageHandler for CleanupStage {
    fn stage(&self) -> Stage {
        Stage::Cleanup
    }

    async fn execute(&self, payload: JobPayload) -> Result<(), PipelineError> {
        let ctx = &self.0;
        let thumb_key = StageContext::thumb_key(&payload);
        match ctx.tags.remove(&payload.bucket, &thumb_key).await {
            Ok(()) => {}
            Err(PipelineError::Store(StoreError::ObjectNotFound { .. })) => {
                debug!(thumb = %thumb_key, "intake thumbnail already gone");
            }
            Err(err) => return Err(err),
        }
        ctx.remove_local_source(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blob_store::list_all;
    use crate::services::ingest::{IngestOptions, IngestionRouter};
    use crate::services::media_engine::RasterEngine;
    use crate::services::memory_store::MemoryBlobStore;
    use crate::services::test_support::{
        RecordingQueue, ScriptedRecognizer, StaticFrames, face, tiny_jpeg,
    };

    fn settings() -> PipelineSettings {
        PipelineSettings {
            compress_min_bytes: 1_000_000,
            thumb_bound: 32,
            video_frames: 3,
            detection_threshold: 0.9,
            confidence_threshold: 0.95,
        }
    }

    fn context(
        recognizer: ScriptedRecognizer,
        frames: Vec<bytes::Bytes>,
    ) -> (Arc<StageContext>, Arc<RecordingQueue>) {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let ctx = Arc::new(StageContext {
            tags: Arc::new(RefTagManager::new(store.clone())),
            store,
            queue: queue.clone(),
            engine: Arc::new(RasterEngine::new()),
            frames: Arc::new(StaticFrames(frames)),
            recognizer: Arc::new(recognizer),
            buckets: BucketNames::new("ms"),
            settings: settings(),
        });
        (ctx, queue)
    }

    /// Run stages off the recorded queue until it drains.
    async fn drain(ctx: &Arc<StageContext>, queue: &RecordingQueue) {
        loop {
            let Some((stage, payload)) = queue.pop().await else {
                break;
            };
            let outcome = match stage {
                Stage::Compress => CompressStage(ctx.clone()).execute(payload).await,
                Stage::Thumbnail => ThumbnailStage(ctx.clone()).execute(payload).await,
                Stage::Recognize => RecognizeStage(ctx.clone()).execute(payload).await,
                Stage::Video => VideoStage(ctx.clone()).execute(payload).await,
                Stage::Cleanup => CleanupStage(ctx.clone()).execute(payload).await,
            };
            outcome.expect("stage run");
        }
    }

    #[tokio::test]
    async fn confident_image_lands_in_its_subject_bucket() {
        let (ctx, queue) = context(
            ScriptedRecognizer::single(vec![face(0.95, &[("alice", 0.97)])]),
            vec![],
        );
        let router = IngestionRouter::new(
            ctx.store.clone(),
            ctx.queue.clone(),
            ctx.buckets.clone(),
        );
        router
            .ingest(
                "IMG__1700000000000.jpg",
                tiny_jpeg(64, 48),
                IngestOptions::default(),
            )
            .await
            .unwrap();
        drain(&ctx, &queue).await;

        // Canonical source still in intake.
        let source_tags = ctx
            .store
            .get_object_tagging("ms-nogroup", "source/IMG__1700000000000.jpg")
            .await
            .unwrap();
        let refs = source_tags.refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs.iter().next().unwrap().to_string(),
            "ms-alice/IMG__1700000000000.jpg"
        );

        // Classified thumbnail copy with its back-reference and metadata.
        let copy_tags = ctx
            .store
            .get_object_tagging("ms-alice", "IMG__1700000000000.jpg")
            .await
            .unwrap();
        assert_eq!(
            copy_tags.source().unwrap().to_string(),
            "ms-nogroup/source/IMG__1700000000000.jpg"
        );
        assert_eq!(copy_tags.origin_time(), Some(1_700_000_000_000));
        assert_eq!(copy_tags.get(TAG_WIDTH), Some("64"));

        // Intake thumbnail cleaned up; no stray group buckets.
        assert!(
            ctx.store
                .get_object("ms-nogroup", "thumb/IMG__1700000000000.jpg")
                .await
                .is_err()
        );
        assert!(!ctx.store.bucket_exists("ms-needrecognition").await.unwrap());
        assert!(!ctx.store.bucket_exists("ms-other").await.unwrap());
    }

    #[tokio::test]
    async fn faceless_image_lands_in_other() {
        let (ctx, queue) = context(ScriptedRecognizer::single(vec![]), vec![]);
        let router =
            IngestionRouter::new(ctx.store.clone(), ctx.queue.clone(), ctx.buckets.clone());
        router
            .ingest("cat.jpg", tiny_jpeg(48, 48), IngestOptions::default())
            .await
            .unwrap();
        drain(&ctx, &queue).await;

        let photos = list_all(ctx.store.as_ref(), "ms-other", None).await.unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].key, "IMG__cat.jpg");
    }

    #[tokio::test]
    async fn partial_confidence_fans_into_subject_and_need_recognition() {
        let (ctx, queue) = context(
            ScriptedRecognizer::single(vec![
                face(0.95, &[("alice", 0.97)]),
                face(0.96, &[("bob", 0.50)]),
            ]),
            vec![],
        );
        let router =
            IngestionRouter::new(ctx.store.clone(), ctx.queue.clone(), ctx.buckets.clone());
        router
            .ingest("pair.jpg", tiny_jpeg(48, 48), IngestOptions::default())
            .await
            .unwrap();
        drain(&ctx, &queue).await;

        let source_tags = ctx
            .store
            .get_object_tagging("ms-nogroup", "source/IMG__pair.jpg")
            .await
            .unwrap();
        let refs: Vec<String> = source_tags.refs().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            refs,
            vec!["ms-alice/IMG__pair.jpg", "ms-needrecognition/IMG__pair.jpg"]
        );
    }

    #[tokio::test]
    async fn re_recognition_never_re_adds_need_recognition() {
        // First pass: alice confident, one stranger — lands in both
        // buckets. Re-recognition: still a stranger — stays put, no new
        // copy in need-recognition, alice not duplicated.
        let (ctx, queue) = context(
            ScriptedRecognizer::new(vec![
                vec![face(0.95, &[("alice", 0.97)]), face(0.96, &[("bob", 0.50)])],
                vec![face(0.95, &[("alice", 0.97)]), face(0.96, &[("bob", 0.50)])],
            ]),
            vec![],
        );
        let router =
            IngestionRouter::new(ctx.store.clone(), ctx.queue.clone(), ctx.buckets.clone());
        router
            .ingest("pair.jpg", tiny_jpeg(48, 48), IngestOptions::default())
            .await
            .unwrap();
        drain(&ctx, &queue).await;

        let payload = JobPayload {
            bucket: "ms-needrecognition".into(),
            object: "IMG__pair.jpg".into(),
            basename: "IMG__pair.jpg".into(),
            re_recognition: true,
            ..Default::default()
        };
        RecognizeStage(ctx.clone()).execute(payload).await.unwrap();

        let source_tags = ctx
            .store
            .get_object_tagging("ms-nogroup", "source/IMG__pair.jpg")
            .await
            .unwrap();
        let refs: Vec<String> = source_tags.refs().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            refs,
            vec!["ms-alice/IMG__pair.jpg", "ms-needrecognition/IMG__pair.jpg"]
        );
        // The unresolved copy is still there for manual triage.
        assert!(
            ctx.store
                .get_object("ms-needrecognition", "IMG__pair.jpg")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn re_recognition_re_homes_once_all_faces_are_confident() {
        let (ctx, queue) = context(
            ScriptedRecognizer::new(vec![
                vec![face(0.96, &[("bob", 0.50)])],
                vec![face(0.96, &[("bob", 0.97)])],
            ]),
            vec![],
        );
        let router =
            IngestionRouter::new(ctx.store.clone(), ctx.queue.clone(), ctx.buckets.clone());
        router
            .ingest("solo.jpg", tiny_jpeg(48, 48), IngestOptions::default())
            .await
            .unwrap();
        drain(&ctx, &queue).await;

        let payload = JobPayload {
            bucket: "ms-needrecognition".into(),
            object: "IMG__solo.jpg".into(),
            basename: "IMG__solo.jpg".into(),
            re_recognition: true,
            ..Default::default()
        };
        RecognizeStage(ctx.clone()).execute(payload).await.unwrap();

        assert!(
            ctx.store
                .get_object("ms-needrecognition", "IMG__solo.jpg")
                .await
                .is_err()
        );
        assert!(
            ctx.store
                .get_object("ms-bob", "IMG__solo.jpg")
                .await
                .is_ok()
        );
        let source_tags = ctx
            .store
            .get_object_tagging("ms-nogroup", "source/IMG__solo.jpg")
            .await
            .unwrap();
        let refs: Vec<String> = source_tags.refs().iter().map(|p| p.to_string()).collect();
        assert_eq!(refs, vec!["ms-bob/IMG__solo.jpg"]);
    }

    #[tokio::test]
    async fn video_uses_earliest_frame_per_subject() {
        // bob appears only in the second sampled frame, alice in both.
        let (ctx, queue) = context(
            ScriptedRecognizer::new(vec![
                vec![face(0.95, &[("alice", 0.97)])],
                vec![face(0.95, &[("alice", 0.98)]), face(0.95, &[("bob", 0.99)])],
            ]),
            vec![tiny_jpeg(64, 48), tiny_jpeg(48, 64)],
        );
        let router =
            IngestionRouter::new(ctx.store.clone(), ctx.queue.clone(), ctx.buckets.clone());
        router
            .ingest("trip.mp4", tiny_jpeg(64, 48), IngestOptions::default())
            .await
            .unwrap();
        drain(&ctx, &queue).await;

        let alice_tags = ctx
            .store
            .get_object_tagging("ms-alice", "VIDEO__trip_alice.jpg")
            .await
            .unwrap();
        // alice's thumbnail came from frame 0 (64x48).
        assert_eq!(alice_tags.get(TAG_WIDTH), Some("64"));
        let bob_tags = ctx
            .store
            .get_object_tagging("ms-bob", "VIDEO__trip_bob.jpg")
            .await
            .unwrap();
        assert_eq!(bob_tags.get(TAG_WIDTH), Some("48"));

        // Both reference the video source object.
        let source_tags = ctx
            .store
            .get_object_tagging("ms-video", "source/VIDEO__trip.mp4")
            .await
            .unwrap();
        assert_eq!(source_tags.refs().len(), 2);
    }

    #[tokio::test]
    async fn faceless_video_goes_to_other() {
        let (ctx, queue) = context(
            ScriptedRecognizer::single(vec![]),
            vec![tiny_jpeg(64, 48)],
        );
        let router =
            IngestionRouter::new(ctx.store.clone(), ctx.queue.clone(), ctx.buckets.clone());
        router
            .ingest("empty.mp4", tiny_jpeg(64, 48), IngestOptions::default())
            .await
            .unwrap();
        drain(&ctx, &queue).await;

        assert!(
            ctx.store
                .get_object("ms-other", "VIDEO__empty.jpg")
                .await
                .is_ok()
        );
        let source_tags = ctx
            .store
            .get_object_tagging("ms-video", "source/VIDEO__empty.mp4")
            .await
            .unwrap();
        assert_eq!(source_tags.refs().len(), 1);
    }
}
