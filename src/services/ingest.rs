//! Ingestion routing: classify an upload, name it, store it, and kick off
//! its pipeline.
//!
//! Non-media files land verbatim in the `others` bucket with no jobs and no
//! tags. Media files get a canonical basename, a `source/` object in their
//! intake bucket, and the first pipeline stage enqueued — only after the
//! source write succeeded, so a storage failure leaves no partial state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::BucketNames;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::job::{JobPayload, Stage};
use crate::models::media::{MediaKind, MediaObject, Variant, canonical_name};
use crate::services::blob_store::BlobStore;
use crate::services::job_queue::JobQueue;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Local file the bytes came from; deleted after the pipeline is done
    /// with it when `remove_source` is set.
    pub source_path: Option<PathBuf>,
    pub remove_source: bool,
}

/// Outcome of a directory sync.
#[derive(Serialize, Debug, Default)]
pub struct SyncReport {
    pub ingested: usize,
    pub failures: Vec<SyncFailure>,
}

#[derive(Serialize, Debug)]
pub struct SyncFailure {
    pub path: String,
    pub error: String,
}

pub struct IngestionRouter {
    store: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    buckets: BucketNames,
}

impl IngestionRouter {
    pub fn new(store: Arc<dyn BlobStore>, queue: Arc<dyn JobQueue>, buckets: BucketNames) -> Self {
        Self {
            store,
            queue,
            buckets,
        }
    }

    /// Route one file into the store and enqueue its pipeline.
    pub async fn ingest(
        &self,
        name: &str,
        data: Bytes,
        opts: IngestOptions,
    ) -> PipelineResult<MediaObject> {
        let kind = MediaKind::from_name(name);

        if kind == MediaKind::Other {
            let bucket = self.buckets.others();
            self.store.ensure_bucket(&bucket).await?;
            self.store.put_object(&bucket, name, data).await?;
            info!(%bucket, name, "non-media file stored verbatim");
            return Ok(MediaObject {
                bucket,
                key: name.to_string(),
                kind,
                basename: name.to_string(),
                origin_ms: Utc::now().timestamp_millis(),
                variant: Variant::Source,
            });
        }

        let canonical = canonical_name(name, kind, Utc::now().timestamp_millis());
        let bucket = match kind {
            MediaKind::Video => self.buckets.video(),
            _ => self.buckets.no_group(),
        };
        let key = Variant::Source.key_for(&canonical.basename);

        self.store.ensure_bucket(&bucket).await?;
        self.store.put_object(&bucket, &key, data).await?;

        let payload = JobPayload {
            bucket: bucket.clone(),
            object: key.clone(),
            basename: canonical.basename.clone(),
            mini_object: Some(Variant::Compressed.key_for(&canonical.basename)),
            thumb_object: Some(Variant::Thumbnail.key_for(&canonical.basename)),
            source_path: opts.source_path,
            remove_source: opts.remove_source,
            re_recognition: false,
        };
        let first_stage = match kind {
            MediaKind::Video => Stage::Video,
            _ => Stage::Compress,
        };
        self.queue
            .enqueue(first_stage, &payload, Duration::ZERO)
            .await?;

        info!(%bucket, %key, stage = %first_stage, "media ingested, pipeline enqueued");
        Ok(MediaObject {
            bucket,
            key,
            kind,
            basename: canonical.basename,
            origin_ms: canonical.origin_ms,
            variant: Variant::Source,
        })
    }

    /// Walk a local directory and ingest every regular, non-hidden file.
    /// Each file is independent: failures are collected, the sync keeps
    /// going. With `remove_source`, a file is deleted locally once its
    /// ingest succeeded.
    pub async fn sync_dir(&self, root: &Path, remove_source: bool) -> PipelineResult<SyncReport> {
        let meta = fs::metadata(root)
            .await
            .map_err(|_| PipelineError::validation(format!("no such directory: {}", root.display())))?;
        if !meta.is_dir() {
            return Err(PipelineError::validation(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(PipelineError::external)?;

        let mut report = SyncReport::default();
        for path in files {
            match self.sync_one(&path, remove_source).await {
                Ok(()) => report.ingested += 1,
                Err(err) => {
                    warn!(path = %path.display(), %err, "sync item failed");
                    report.failures.push(SyncFailure {
                        path: path.display().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn sync_one(&self, path: &Path, remove_source: bool) -> PipelineResult<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::validation("non-UTF8 filename"))?
            .to_string();
        let data = Bytes::from(fs::read(path).await.map_err(PipelineError::external)?);

        let kind = MediaKind::from_name(&name);
        self.ingest(
            &name,
            data,
            IngestOptions {
                source_path: Some(path.to_path_buf()),
                remove_source,
            },
        )
        .await?;

        // Media files stay on disk until their pipeline finishes; non-media
        // files have no pipeline, so remove them here.
        if remove_source && kind == MediaKind::Other {
            fs::remove_file(path).await.map_err(PipelineError::external)?;
        }
        Ok(())
    }
}

fn collect_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|n| !n.starts_with('.'))
        })
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryBlobStore;
    use crate::services::test_support::RecordingQueue;

    fn router(
        store: Arc<MemoryBlobStore>,
        queue: Arc<RecordingQueue>,
    ) -> IngestionRouter {
        IngestionRouter::new(store, queue, BucketNames::new("ms"))
    }

    #[tokio::test]
    async fn text_file_goes_to_others_with_no_jobs_or_tags() {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let r = router(store.clone(), queue.clone());

        let media = r
            .ingest("notes.txt", Bytes::from_static(b"hello"), IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(media.bucket, "others");
        assert_eq!(media.kind, MediaKind::Other);
        assert!(queue.jobs.lock().await.is_empty());
        let tags = store.get_object_tagging("others", "notes.txt").await.unwrap();
        assert!(tags.0.is_empty());
        assert!(!store.bucket_exists("ms-nogroup").await.unwrap());
    }

    #[tokio::test]
    async fn image_lands_in_no_group_and_starts_with_compress() {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let r = router(store.clone(), queue.clone());

        let media = r
            .ingest(
                "IMG__1700000000000.jpg",
                Bytes::from_static(b"px"),
                IngestOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(media.bucket, "ms-nogroup");
        assert_eq!(media.key, "source/IMG__1700000000000.jpg");
        assert_eq!(media.origin_ms, 1_700_000_000_000);

        let jobs = queue.jobs.lock().await;
        assert_eq!(jobs.len(), 1);
        let (stage, payload) = &jobs[0];
        assert_eq!(*stage, Stage::Compress);
        assert_eq!(payload.mini_object.as_deref(), Some("min/IMG__1700000000000.jpg"));
        assert_eq!(payload.thumb_object.as_deref(), Some("thumb/IMG__1700000000000.jpg"));
    }

    #[tokio::test]
    async fn video_starts_with_video_stage() {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let r = router(store.clone(), queue.clone());

        let media = r
            .ingest("trip.mp4", Bytes::from_static(b"vid"), IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(media.bucket, "ms-video");
        assert_eq!(media.basename, "VIDEO__trip.mp4");
        let jobs = queue.jobs.lock().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0, Stage::Video);
    }

    #[tokio::test]
    async fn sync_walks_directory_and_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"px").unwrap();
        std::fs::write(dir.path().join(".hidden.jpg"), b"px").unwrap();
        std::fs::write(dir.path().join("doc.txt"), b"text").unwrap();

        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let r = router(store.clone(), queue.clone());

        let report = r.sync_dir(dir.path(), true).await.unwrap();
        assert_eq!(report.ingested, 2);
        assert!(report.failures.is_empty());

        // Non-media synced files are removed locally right away; media
        // files wait for their pipeline.
        assert!(!dir.path().join("doc.txt").exists());
        assert!(dir.path().join("a.jpg").exists());
        assert!(dir.path().join(".hidden.jpg").exists());
    }

    #[tokio::test]
    async fn sync_rejects_missing_directory() {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let r = router(store, queue);
        let err = r
            .sync_dir(Path::new("/definitely/not/here"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
