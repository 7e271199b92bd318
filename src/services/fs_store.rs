//! Disk-backed [`BlobStore`] adapter.
//!
//! Metadata and tags live in SQLite; payloads live on disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`, where the shard pair is the
//! first two bytes of md5(bucket/key). Uploads go through a temp file with
//! fsync before renaming into place.

use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::models::tags::{ObjectPath, TagSet};
use crate::services::blob_store::{
    BlobStore, ListPage, ListParams, ObjectEntry, ObjectReader, StoreError, StoreResult,
    ensure_bucket_name_safe, ensure_key_safe,
};

#[derive(sqlx::FromRow)]
struct BucketRow {
    id: Uuid,
    name: String,
}

#[derive(sqlx::FromRow)]
struct ObjectRow {
    id: Uuid,
    key: String,
    size_bytes: i64,
    etag: Option<String>,
    last_modified: DateTime<Utc>,
}

impl ObjectRow {
    fn entry(&self) -> ObjectEntry {
        ObjectEntry {
            key: self.key.clone(),
            size_bytes: self.size_bytes,
            etag: self.etag.clone(),
            last_modified: self.last_modified,
        }
    }
}

#[derive(Clone)]
pub struct FsBlobStore {
    db: Arc<SqlitePool>,
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers keeping per-directory file counts low.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<BucketRow> {
        ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, BucketRow>("SELECT id, name FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
                other => StoreError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &BucketRow, key: &str) -> StoreResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT id, key, size_bytes, etag, last_modified
             FROM objects WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// Upsert the metadata row for an overwritten or new object and clear
    /// any tags left from a previous object under the same key.
    async fn upsert_object_row(
        &self,
        bucket: &BucketRow,
        key: &str,
        size_bytes: i64,
        etag: Option<&str>,
    ) -> StoreResult<ObjectRow> {
        let row = sqlx::query_as::<_, ObjectRow>(
            r#"
            INSERT INTO objects (id, bucket_id, key, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, key, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(row.id)
            .execute(&*self.db)
            .await?;

        Ok(row)
    }

    async fn write_payload(&self, file_path: &Path, data: &Bytes) -> StoreResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<(), io::Error>(())
        }
        .await;
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        Ok(())
    }

    /// Recursively remove empty shard directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn read_tags(&self, object_id: Uuid) -> StoreResult<TagSet> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT tag_key, tag_value FROM object_tags WHERE object_id = ?")
                .bind(object_id)
                .fetch_all(&*self.db)
                .await?;
        Ok(TagSet(rows.into_iter().collect::<BTreeMap<_, _>>()))
    }

    async fn write_tags(&self, object_id: Uuid, tags: &TagSet) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object_id)
            .execute(&mut *tx)
            .await?;
        for (key, value) in &tags.0 {
            sqlx::query("INSERT INTO object_tags (object_id, tag_key, tag_value) VALUES (?, ?, ?)")
                .bind(object_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        ensure_bucket_name_safe(bucket)?;
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row.is_some())
    }

    async fn make_bucket(&self, bucket: &str) -> StoreResult<()> {
        ensure_bucket_name_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(bucket)
            .bind(Utc::now())
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::BucketAlreadyExists(bucket.to_string()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM buckets ORDER BY name")
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn list_objects(&self, bucket: &str, params: ListParams) -> StoreResult<ListPage> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, 1000);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, key, size_bytes, etag, last_modified FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(bucket_rec.id);
        if let Some(prefix) = &params.prefix {
            builder.push(" AND key LIKE ");
            builder.push_bind(format!("{}%", prefix));
        }
        if let Some(after) = &params.start_after {
            builder.push(" AND key > ");
            builder.push_bind(after);
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let next = if rows.len() == fetch_limit {
            rows.pop();
            rows.last().map(|row| row.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            entries: rows.iter().map(ObjectRow::entry).collect(),
            next,
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<ObjectEntry> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        self.write_payload(&file_path, &data).await?;

        let etag = format!("{:x}", md5::compute(&data));
        match self
            .upsert_object_row(&bucket_rec, key, data.len() as i64, Some(&etag))
            .await
        {
            Ok(row) => Ok(row.entry()),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::read(&file_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<(ObjectEntry, ObjectReader)> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok((object.entry(), Box::pin(file) as ObjectReader))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        Ok(self.fetch_object(&bucket_rec, key).await?.entry())
    }

    async fn copy_object(&self, bucket: &str, key: &str, source: &ObjectPath) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let src_bucket = self.fetch_bucket(&source.bucket).await?;
        let src_object = self.fetch_object(&src_bucket, &source.key).await?;
        let dst_bucket = self.fetch_bucket(bucket).await?;

        let src_path = self.object_path(&src_bucket.name, &source.key);
        let dst_path = self.object_path(&dst_bucket.name, key);
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src_path, &dst_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: source.bucket.clone(),
                    key: source.key.clone(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        let row = self
            .upsert_object_row(
                &dst_bucket,
                key,
                src_object.size_bytes,
                src_object.etag.as_deref(),
            )
            .await?;

        // Tags travel with the copy, like a same-store S3 CopyObject.
        sqlx::query(
            "INSERT INTO object_tags (object_id, tag_key, tag_value)
             SELECT ?, tag_key, tag_value FROM object_tags WHERE object_id = ?",
        )
        .bind(row.id)
        .bind(src_object.id)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await?;
        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StoreResult<TagSet> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;
        self.read_tags(object.id).await
    }

    async fn set_object_tagging(&self, bucket: &str, key: &str, tags: &TagSet) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;
        self.write_tags(object.id, tags).await
    }

    async fn get_bucket_tagging(&self, bucket: &str) -> StoreResult<TagSet> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT tag_key, tag_value FROM bucket_tags WHERE bucket_id = ?")
                .bind(bucket_rec.id)
                .fetch_all(&*self.db)
                .await?;
        Ok(TagSet(rows.into_iter().collect::<BTreeMap<_, _>>()))
    }

    async fn set_bucket_tagging(&self, bucket: &str, tags: &TagSet) -> StoreResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM bucket_tags WHERE bucket_id = ?")
            .bind(bucket_rec.id)
            .execute(&mut *tx)
            .await?;
        for (key, value) in &tags.0 {
            sqlx::query("INSERT INTO bucket_tags (bucket_id, tag_key, tag_value) VALUES (?, ?, ?)")
                .bind(bucket_rec.id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
