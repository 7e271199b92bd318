//! Album and photo listings served from a process-wide cache.
//!
//! A full listing walks every bucket page by page and reads every object's
//! tags, which is the expensive part. The cache holds the last computed
//! snapshot and is rebuilt only on explicit [`ListingCache::refresh`];
//! readers may observe a listing that is stale relative to the latest
//! copy/remove. That staleness is the contract, not an accident — browsing
//! does not need strong consistency.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::tags::TagSet;
use crate::services::blob_store::{BlobStore, StoreError, list_all};

/// One bucket in the album view.
#[derive(Serialize, Clone, Debug)]
pub struct AlbumEntry {
    pub name: String,
    pub tags: TagSet,
    pub photos: usize,
}

/// One object with its tags.
#[derive(Serialize, Clone, Debug)]
pub struct PhotoEntry {
    pub key: String,
    pub size_bytes: i64,
    pub tags: TagSet,
}

#[derive(Default)]
struct Snapshot {
    albums: Vec<AlbumEntry>,
    photos: HashMap<String, Vec<PhotoEntry>>,
}

pub struct ListingCache {
    store: Arc<dyn BlobStore>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl ListingCache {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
        }
    }

    /// All buckets with their tags and photo counts.
    pub async fn albums(&self) -> PipelineResult<Vec<AlbumEntry>> {
        Ok(self.snapshot().await?.albums.clone())
    }

    /// Objects (with tags) of one bucket.
    pub async fn photos(&self, bucket: &str) -> PipelineResult<Vec<PhotoEntry>> {
        let snapshot = self.snapshot().await?;
        snapshot
            .photos
            .get(bucket)
            .cloned()
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()).into())
    }

    /// Throw the snapshot away and rebuild it from the store.
    pub async fn refresh(&self) -> PipelineResult<()> {
        let rebuilt = Arc::new(self.build().await?);
        *self.snapshot.write().await = Some(rebuilt);
        Ok(())
    }

    /// The current snapshot, building the first one lazily.
    async fn snapshot(&self) -> PipelineResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.snapshot.read().await.clone() {
            return Ok(snapshot);
        }
        let built = Arc::new(self.build().await?);
        let mut guard = self.snapshot.write().await;
        // A refresh may have raced us; either snapshot is fine.
        if guard.is_none() {
            *guard = Some(built.clone());
        }
        Ok(guard.clone().unwrap_or(built))
    }

    async fn build(&self) -> PipelineResult<Snapshot> {
        let mut snapshot = Snapshot::default();
        for bucket in self.store.list_buckets().await? {
            let bucket_tags = self.store.get_bucket_tagging(&bucket).await?;
            let entries = list_all(self.store.as_ref(), &bucket, None).await?;
            // Per-object tag reads dominate the rebuild; issue them
            // concurrently within each bucket.
            let photos = try_join_all(entries.into_iter().map(|entry| {
                let store = self.store.clone();
                let bucket = bucket.clone();
                async move {
                    let tags = store.get_object_tagging(&bucket, &entry.key).await?;
                    Ok::<_, PipelineError>(PhotoEntry {
                        key: entry.key,
                        size_bytes: entry.size_bytes,
                        tags,
                    })
                }
            }))
            .await?;
            snapshot.albums.push(AlbumEntry {
                name: bucket.clone(),
                tags: bucket_tags,
                photos: photos.len(),
            });
            snapshot.photos.insert(bucket, photos);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryBlobStore;
    use bytes::Bytes;

    #[tokio::test]
    async fn listings_are_stale_until_refresh() {
        let store = Arc::new(MemoryBlobStore::new());
        store.make_bucket("ms-alice").await.unwrap();
        store
            .put_object("ms-alice", "a.jpg", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let cache = ListingCache::new(store.clone());
        assert_eq!(cache.photos("ms-alice").await.unwrap().len(), 1);

        store
            .put_object("ms-alice", "b.jpg", Bytes::from_static(b"y"))
            .await
            .unwrap();
        // Still the old snapshot.
        assert_eq!(cache.photos("ms-alice").await.unwrap().len(), 1);

        cache.refresh().await.unwrap();
        assert_eq!(cache.photos("ms-alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn albums_carry_tags_and_counts() {
        let store = Arc::new(MemoryBlobStore::new());
        store.make_bucket("ms-alice").await.unwrap();
        let mut tags = TagSet::new();
        tags.set("cover", "a.jpg");
        store.set_bucket_tagging("ms-alice", &tags).await.unwrap();
        store
            .put_object("ms-alice", "a.jpg", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let cache = ListingCache::new(store);
        let albums = cache.albums().await.unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].name, "ms-alice");
        assert_eq!(albums[0].photos, 1);
        assert_eq!(albums[0].tags.get("cover"), Some("a.jpg"));
    }

    #[tokio::test]
    async fn unknown_bucket_is_not_found() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = ListingCache::new(store);
        assert!(cache.photos("nope").await.is_err());
    }
}
