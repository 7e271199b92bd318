//! In-memory [`BlobStore`] adapter.
//!
//! Backs the test suite and small demos with the exact trait semantics of
//! the disk adapter: lexicographic paged listing, tag-copying copy, hard
//! deletes.

use std::collections::BTreeMap;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::tags::{ObjectPath, TagSet};
use crate::services::blob_store::{
    BlobStore, ListPage, ListParams, ObjectEntry, ObjectReader, StoreError, StoreResult,
    ensure_bucket_name_safe, ensure_key_safe,
};

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    tags: TagSet,
    entry: ObjectEntry,
}

#[derive(Default)]
struct BucketData {
    tags: TagSet,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    inner: RwLock<BTreeMap<String, BucketData>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn entry_for(key: &str, data: &Bytes) -> ObjectEntry {
    ObjectEntry {
        key: key.to_string(),
        size_bytes: data.len() as i64,
        etag: Some(format!("{:x}", md5::compute(data))),
        last_modified: Utc::now(),
    }
}

fn not_found(bucket: &str, key: &str) -> StoreError {
    StoreError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.inner.read().await.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> StoreResult<()> {
        ensure_bucket_name_safe(bucket)?;
        let mut inner = self.inner.write().await;
        if inner.contains_key(bucket) {
            return Err(StoreError::BucketAlreadyExists(bucket.to_string()));
        }
        inner.insert(bucket.to_string(), BucketData::default());
        Ok(())
    }

    async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }

    async fn list_objects(&self, bucket: &str, params: ListParams) -> StoreResult<ListPage> {
        let inner = self.inner.read().await;
        let data = inner
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        let max_keys = params.max_keys.clamp(1, 1000);
        let mut entries: Vec<ObjectEntry> = data
            .objects
            .iter()
            .filter(|(key, _)| match &params.prefix {
                Some(prefix) => key.starts_with(prefix.as_str()),
                None => true,
            })
            .filter(|(key, _)| match &params.start_after {
                Some(after) => key.as_str() > after.as_str(),
                None => true,
            })
            .take(max_keys + 1)
            .map(|(_, obj)| obj.entry.clone())
            .collect();

        let next = if entries.len() > max_keys {
            entries.pop();
            entries.last().map(|e| e.key.clone())
        } else {
            None
        };

        Ok(ListPage { entries, next })
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<ObjectEntry> {
        ensure_key_safe(key)?;
        let mut inner = self.inner.write().await;
        let bucket_data = inner
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let entry = entry_for(key, &data);
        bucket_data.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                tags: TagSet::new(),
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        let inner = self.inner.read().await;
        inner
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<(ObjectEntry, ObjectReader)> {
        let inner = self.inner.read().await;
        let obj = inner
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .objects
            .get(key)
            .ok_or_else(|| not_found(bucket, key))?;
        let reader: ObjectReader = Box::pin(Cursor::new(obj.data.clone()));
        Ok((obj.entry.clone(), reader))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry> {
        let inner = self.inner.read().await;
        inner
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .objects
            .get(key)
            .map(|obj| obj.entry.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn copy_object(&self, bucket: &str, key: &str, source: &ObjectPath) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let mut inner = self.inner.write().await;
        let src = inner
            .get(&source.bucket)
            .ok_or_else(|| StoreError::BucketNotFound(source.bucket.clone()))?
            .objects
            .get(&source.key)
            .cloned()
            .ok_or_else(|| not_found(&source.bucket, &source.key))?;
        let target = inner
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let mut entry = entry_for(key, &src.data);
        entry.etag = src.entry.etag.clone();
        target.objects.insert(
            key.to_string(),
            StoredObject {
                data: src.data,
                tags: src.tags,
                entry,
            },
        );
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let bucket_data = inner
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        bucket_data
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StoreResult<TagSet> {
        let inner = self.inner.read().await;
        inner
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .objects
            .get(key)
            .map(|obj| obj.tags.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn set_object_tagging(&self, bucket: &str, key: &str, tags: &TagSet) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let obj = inner
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .objects
            .get_mut(key)
            .ok_or_else(|| not_found(bucket, key))?;
        obj.tags = tags.clone();
        Ok(())
    }

    async fn get_bucket_tagging(&self, bucket: &str) -> StoreResult<TagSet> {
        let inner = self.inner.read().await;
        inner
            .get(bucket)
            .map(|data| data.tags.clone())
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
    }

    async fn set_bucket_tagging(&self, bucket: &str, tags: &TagSet) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let data = inner
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        data.tags = tags.clone();
        Ok(())
    }
}
