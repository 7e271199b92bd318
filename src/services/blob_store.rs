//! The blob-store boundary consumed by the pipeline.
//!
//! Everything above this trait (router, stages, tag manager, listing) talks
//! to storage exclusively through [`BlobStore`], so the same logic runs
//! against the disk-backed adapter in production and the in-memory adapter
//! in tests.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::models::tags::{ObjectPath, TagSet};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata for one stored object.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectEntry {
    pub key: String,
    pub size_bytes: i64,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Parameters for one page of an object listing.
#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub prefix: Option<String>,
    /// Continuation token: list keys strictly after this one.
    pub start_after: Option<String>,
    /// Page size; clamped by adapters to a sane range.
    pub max_keys: usize,
}

/// One finite page of a listing. `next` is the token to pass as
/// `start_after` for the following page, absent on the last one.
#[derive(Debug)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
    pub next: Option<String>,
}

/// Streaming handle for an object payload.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Bucket/object CRUD plus per-object and per-bucket key-value tagging.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    async fn make_bucket(&self, bucket: &str) -> StoreResult<()>;

    async fn list_buckets(&self) -> StoreResult<Vec<String>>;

    /// List objects in lexicographic key order, one restartable page at a
    /// time.
    async fn list_objects(&self, bucket: &str, params: ListParams) -> StoreResult<ListPage>;

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<ObjectEntry>;

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Bytes>;

    /// Open an object for streaming out without buffering it whole.
    async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<(ObjectEntry, ObjectReader)>;

    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry>;

    /// Copy payload AND tags from `source` into `bucket/key`.
    async fn copy_object(&self, bucket: &str, key: &str, source: &ObjectPath) -> StoreResult<()>;

    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StoreResult<TagSet>;

    async fn set_object_tagging(&self, bucket: &str, key: &str, tags: &TagSet) -> StoreResult<()>;

    async fn get_bucket_tagging(&self, bucket: &str) -> StoreResult<TagSet>;

    async fn set_bucket_tagging(&self, bucket: &str, tags: &TagSet) -> StoreResult<()>;

    /// Create `bucket` if it does not exist yet. Buckets are created lazily
    /// on first write, so a concurrent creation is not an error.
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        match self.make_bucket(bucket).await {
            Ok(()) | Err(StoreError::BucketAlreadyExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Drain every page of a listing into one vector.
pub async fn list_all(
    store: &dyn BlobStore,
    bucket: &str,
    prefix: Option<&str>,
) -> StoreResult<Vec<ObjectEntry>> {
    let mut entries = Vec::new();
    let mut start_after = None;
    loop {
        let page = store
            .list_objects(
                bucket,
                ListParams {
                    prefix: prefix.map(str::to_string),
                    start_after,
                    max_keys: 1000,
                },
            )
            .await?;
        entries.extend(page.entries);
        match page.next {
            Some(token) => start_after = Some(token),
            None => return Ok(entries),
        }
    }
}

/// Basic key validation shared by adapters; rejects trivial traversal
/// vectors rather than attempting a full sanitizer.
pub(crate) fn ensure_key_safe(key: &str) -> StoreResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StoreError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidObjectKey);
    }
    Ok(())
}

/// Bucket names follow S3-like rules: 3–63 chars, lowercase letters,
/// digits, and hyphens, starting and ending alphanumeric.
pub(crate) fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.len() < 3 || name.len() > 63 {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(())
}
