//! Reference-counted cross-bucket copy and remove.
//!
//! A classified copy carries a `source` tag pointing at its canonical
//! object; the canonical object carries a `refs` tag listing every copy.
//! `copy` and `remove` keep the two sides consistent, and the canonical is
//! deleted only once its ref set drains. Every read-modify-write of a
//! `refs` tag runs under a per-canonical-path mutex so interleaved copies
//! and removes in this process cannot lose updates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::tags::{ObjectPath, TAG_SOURCE};
use crate::services::blob_store::{BlobStore, StoreError};

pub struct RefTagManager {
    store: Arc<dyn BlobStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// One failed item of a batch operation; the batch itself keeps going.
#[derive(Serialize, Debug)]
pub struct BatchFailure {
    pub bucket: String,
    pub key: String,
    pub error: String,
}

impl RefTagManager {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, canonical: &ObjectPath) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(canonical.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn drop_lock(&self, canonical: &ObjectPath) {
        self.locks.lock().await.remove(&canonical.to_string());
    }

    /// Copy the object at `source` into `bucket/key` and register the copy
    /// on the canonical object's ref set.
    ///
    /// Idempotent: copying the same target twice leaves the ref set with
    /// one entry. After return, the copy's `source` tag points at the
    /// canonical object and the canonical's `refs` contain `bucket/key`
    /// exactly once.
    pub async fn copy(&self, bucket: &str, key: &str, source: &ObjectPath) -> PipelineResult<()> {
        self.store.ensure_bucket(bucket).await?;
        self.store.copy_object(bucket, key, source).await?;

        // The copy inherits the source object's tags. An existing `source`
        // tag means `source` was itself derived from a canonical; absent,
        // the copied object is the canonical.
        let mut copy_tags = self.store.get_object_tagging(bucket, key).await?;
        let canonical = match copy_tags.get(TAG_SOURCE) {
            Some(raw) => raw.parse::<ObjectPath>().map_err(|_| {
                PipelineError::tag_consistency(format!(
                    "copy {bucket}/{key} has malformed source tag `{raw}`"
                ))
            })?,
            None => {
                copy_tags.set_source(source);
                self.store.set_object_tagging(bucket, key, &copy_tags).await?;
                source.clone()
            }
        };

        let lock = self.lock_for(&canonical).await;
        let _guard = lock.lock().await;

        let mut canon_tags = self
            .store
            .get_object_tagging(&canonical.bucket, &canonical.key)
            .await?;
        let mut refs = canon_tags.refs();
        if refs.insert(ObjectPath::new(bucket, key)) {
            canon_tags.set_refs(&refs);
            self.store
                .set_object_tagging(&canonical.bucket, &canonical.key, &canon_tags)
                .await?;
            debug!(canonical = %canonical, %bucket, %key, "ref added");
        }
        Ok(())
    }

    /// Remove the classified copy at `bucket/key`, dropping it from its
    /// canonical object's ref set. A canonical whose ref set drains is
    /// deleted, along with the compressed variant its `mini` tag names.
    pub async fn remove(&self, bucket: &str, key: &str) -> PipelineResult<()> {
        let tags = self.store.get_object_tagging(bucket, key).await?;
        let canonical = tags.source().ok_or_else(|| {
            PipelineError::tag_consistency(format!(
                "object {bucket}/{key} has no usable source tag"
            ))
        })?;

        let lock = self.lock_for(&canonical).await;
        let mut canonical_deleted = false;
        {
            let _guard = lock.lock().await;

            match self
                .store
                .get_object_tagging(&canonical.bucket, &canonical.key)
                .await
            {
                Ok(mut canon_tags) => {
                    let mut refs = canon_tags.refs();
                    refs.remove(&ObjectPath::new(bucket, key));
                    if refs.is_empty() {
                        if let Some(mini) = canon_tags.mini() {
                            if let Err(err) =
                                self.store.remove_object(&mini.bucket, &mini.key).await
                            {
                                warn!(%mini, %err, "failed to reclaim compressed variant");
                            }
                        }
                        self.store
                            .remove_object(&canonical.bucket, &canonical.key)
                            .await?;
                        canonical_deleted = true;
                        info!(canonical = %canonical, "last reference removed, canonical deleted");
                    } else {
                        canon_tags.set_refs(&refs);
                        self.store
                            .set_object_tagging(&canonical.bucket, &canonical.key, &canon_tags)
                            .await?;
                    }
                }
                // The canonical is already gone; still delete the copy.
                Err(StoreError::ObjectNotFound { .. }) => {
                    warn!(canonical = %canonical, "canonical missing during remove");
                }
                Err(err) => return Err(err.into()),
            }

            self.store.remove_object(bucket, key).await?;
        }
        // Only a deleted canonical retires its lock entry; dropping it any
        // earlier could hand a second mutex to a task that raced in.
        if canonical_deleted {
            self.drop_lock(&canonical).await;
        }
        Ok(())
    }

    /// Best-effort batch copy: each item independently, failures collected.
    pub async fn copy_many(
        &self,
        items: &[(String, String, ObjectPath)],
    ) -> Vec<BatchFailure> {
        let mut failures = Vec::new();
        for (bucket, key, source) in items {
            if let Err(err) = self.copy(bucket, key, source).await {
                warn!(%bucket, %key, %err, "batch copy item failed");
                failures.push(BatchFailure {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    error: err.to_string(),
                });
            }
        }
        failures
    }

    /// Best-effort batch remove from one bucket.
    pub async fn remove_many(&self, bucket: &str, keys: &[String]) -> Vec<BatchFailure> {
        let mut failures = Vec::new();
        for key in keys {
            if let Err(err) = self.remove(bucket, key).await {
                warn!(%bucket, %key, %err, "batch remove item failed");
                failures.push(BatchFailure {
                    bucket: bucket.to_string(),
                    key: key.clone(),
                    error: err.to_string(),
                });
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tags::{TAG_MINI, TagSet};
    use crate::services::memory_store::MemoryBlobStore;
    use bytes::Bytes;

    /// A canonical thumbnail in the intake bucket whose `source` tag points
    /// at the source object, mirroring what the thumbnail stage produces.
    async fn seed(store: &MemoryBlobStore) -> (ObjectPath, ObjectPath) {
        store.make_bucket("ms-nogroup").await.unwrap();
        let source = ObjectPath::new("ms-nogroup", "source/IMG__1.jpg");
        let thumb = ObjectPath::new("ms-nogroup", "thumb/IMG__1.jpg");
        store
            .put_object(&source.bucket, &source.key, Bytes::from_static(b"full"))
            .await
            .unwrap();
        store
            .put_object(&thumb.bucket, &thumb.key, Bytes::from_static(b"small"))
            .await
            .unwrap();
        let mut tags = TagSet::new();
        tags.set_source(&source);
        store
            .set_object_tagging(&thumb.bucket, &thumb.key, &tags)
            .await
            .unwrap();
        (source, thumb)
    }

    async fn refs_of(store: &MemoryBlobStore, path: &ObjectPath) -> Vec<String> {
        store
            .get_object_tagging(&path.bucket, &path.key)
            .await
            .unwrap()
            .refs()
            .iter()
            .map(ObjectPath::to_string)
            .collect()
    }

    #[tokio::test]
    async fn copy_registers_ref_and_back_reference() {
        let store = Arc::new(MemoryBlobStore::new());
        let (source, thumb) = seed(&store).await;
        let mgr = RefTagManager::new(store.clone());

        mgr.copy("ms-alice", "IMG__1.jpg", &thumb).await.unwrap();

        assert_eq!(refs_of(&store, &source).await, vec!["ms-alice/IMG__1.jpg"]);
        let copy_tags = store
            .get_object_tagging("ms-alice", "IMG__1.jpg")
            .await
            .unwrap();
        assert_eq!(copy_tags.source().unwrap(), source);
    }

    #[tokio::test]
    async fn copy_is_idempotent() {
        let store = Arc::new(MemoryBlobStore::new());
        let (source, thumb) = seed(&store).await;
        let mgr = RefTagManager::new(store.clone());

        mgr.copy("ms-alice", "IMG__1.jpg", &thumb).await.unwrap();
        mgr.copy("ms-alice", "IMG__1.jpg", &thumb).await.unwrap();

        assert_eq!(refs_of(&store, &source).await, vec!["ms-alice/IMG__1.jpg"]);
    }

    #[tokio::test]
    async fn remove_after_copy_restores_ref_set() {
        let store = Arc::new(MemoryBlobStore::new());
        let (source, thumb) = seed(&store).await;
        let mgr = RefTagManager::new(store.clone());

        mgr.copy("ms-alice", "IMG__1.jpg", &thumb).await.unwrap();
        let before = refs_of(&store, &source).await;
        mgr.copy("ms-bob", "IMG__1.jpg", &thumb).await.unwrap();
        mgr.remove("ms-bob", "IMG__1.jpg").await.unwrap();

        assert_eq!(refs_of(&store, &source).await, before);
        assert!(
            store
                .get_object("ms-bob", "IMG__1.jpg")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn canonical_survives_until_last_reference() {
        let store = Arc::new(MemoryBlobStore::new());
        let (source, thumb) = seed(&store).await;
        let mgr = RefTagManager::new(store.clone());

        mgr.copy("ms-alice", "IMG__1.jpg", &thumb).await.unwrap();
        mgr.copy("ms-bob", "IMG__1.jpg", &thumb).await.unwrap();
        mgr.copy("ms-other", "IMG__1.jpg", &thumb).await.unwrap();

        mgr.remove("ms-alice", "IMG__1.jpg").await.unwrap();
        assert!(store.get_object(&source.bucket, &source.key).await.is_ok());
        mgr.remove("ms-other", "IMG__1.jpg").await.unwrap();
        assert!(store.get_object(&source.bucket, &source.key).await.is_ok());

        mgr.remove("ms-bob", "IMG__1.jpg").await.unwrap();
        assert!(store.get_object(&source.bucket, &source.key).await.is_err());
    }

    #[tokio::test]
    async fn last_remove_reclaims_mini_variant() {
        let store = Arc::new(MemoryBlobStore::new());
        let (source, thumb) = seed(&store).await;
        store
            .put_object("ms-nogroup", "min/IMG__1.jpg", Bytes::from_static(b"mid"))
            .await
            .unwrap();
        let mut tags = store
            .get_object_tagging(&source.bucket, &source.key)
            .await
            .unwrap();
        tags.set(TAG_MINI, "ms-nogroup/min/IMG__1.jpg");
        store
            .set_object_tagging(&source.bucket, &source.key, &tags)
            .await
            .unwrap();
        let mgr = RefTagManager::new(store.clone());

        mgr.copy("ms-alice", "IMG__1.jpg", &thumb).await.unwrap();
        mgr.remove("ms-alice", "IMG__1.jpg").await.unwrap();

        assert!(store.get_object(&source.bucket, &source.key).await.is_err());
        assert!(store.get_object("ms-nogroup", "min/IMG__1.jpg").await.is_err());
    }

    #[tokio::test]
    async fn interleaved_copies_and_removes_do_not_lose_refs() {
        let store = Arc::new(MemoryBlobStore::new());
        let (source, thumb) = seed(&store).await;
        let mgr = Arc::new(RefTagManager::new(store.clone()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let mgr = mgr.clone();
            let thumb = thumb.clone();
            handles.push(tokio::spawn(async move {
                let bucket = format!("ms-subject{i}");
                mgr.copy(&bucket, "IMG__1.jpg", &thumb).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(refs_of(&store, &source).await.len(), 8);

        let mut handles = Vec::new();
        for i in 0..4 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                let bucket = format!("ms-subject{i}");
                mgr.remove(&bucket, "IMG__1.jpg").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(refs_of(&store, &source).await.len(), 4);
        assert!(store.get_object(&source.bucket, &source.key).await.is_ok());
    }

    #[tokio::test]
    async fn remove_without_source_tag_is_a_consistency_error() {
        let store = Arc::new(MemoryBlobStore::new());
        store.make_bucket("ms-alice").await.unwrap();
        store
            .put_object("ms-alice", "stray.jpg", Bytes::from_static(b"x"))
            .await
            .unwrap();
        let mgr = RefTagManager::new(store.clone());

        let err = mgr.remove("ms-alice", "stray.jpg").await.unwrap_err();
        assert!(matches!(err, PipelineError::TagConsistency(_)));
        // Best-effort batch keeps going and reports the failure.
        let failures = mgr
            .remove_many("ms-alice", &["stray.jpg".to_string()])
            .await;
        assert_eq!(failures.len(), 1);
    }
}
