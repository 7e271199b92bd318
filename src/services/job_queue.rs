//! Durable, delayable job queue backed by SQLite.
//!
//! Jobs are rows claimed by a small polling worker pool; one handler is
//! registered per stage. A completed job is deleted, a failed job moves to
//! the dead-letter table with its error message and is never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::job::{JobPayload, Stage};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("payload encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Submission half of the queue. Stages and the router only ever see this.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue `payload` for `stage`, runnable no earlier than `delay` from
    /// now.
    async fn enqueue(&self, stage: Stage, payload: &JobPayload, delay: Duration)
    -> QueueResult<()>;
}

/// One unit of stage work. Handlers report failure through the error and
/// must not reschedule themselves.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;
    async fn execute(&self, payload: JobPayload) -> Result<(), PipelineError>;
}

#[derive(Clone)]
pub struct SqliteJobQueue {
    db: Arc<SqlitePool>,
}

impl SqliteJobQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(
        &self,
        stage: Stage,
        payload: &JobPayload,
        delay: Duration,
    ) -> QueueResult<()> {
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        sqlx::query(
            "INSERT INTO jobs (id, stage, payload, run_at, claimed, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(stage.as_str())
        .bind(serde_json::to_string(payload)?)
        .bind(run_at)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        debug!(stage = %stage, object = %payload.object, "enqueued job");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ClaimedJob {
    id: Uuid,
    stage: String,
    payload: String,
}

/// A dead-lettered job, kept for operator inspection.
#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct DeadJob {
    pub id: Uuid,
    pub stage: String,
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

pub async fn list_dead_jobs(db: &SqlitePool) -> QueueResult<Vec<DeadJob>> {
    Ok(sqlx::query_as::<_, DeadJob>(
        "SELECT id, stage, payload, error, failed_at FROM dead_jobs ORDER BY failed_at DESC",
    )
    .fetch_all(db)
    .await?)
}

/// Polling worker pool executing registered stage handlers.
pub struct JobWorkers {
    db: Arc<SqlitePool>,
    poll_interval: Duration,
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

impl JobWorkers {
    pub fn new(db: Arc<SqlitePool>, poll_interval: Duration) -> Self {
        Self {
            db,
            poll_interval,
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.stage(), handler);
    }

    /// Spawn `count` independent workers sharing this registry.
    pub fn spawn(self, count: usize) -> Vec<JoinHandle<()>> {
        let shared = Arc::new(self);
        (0..count)
            .map(|worker| {
                let pool = shared.clone();
                tokio::spawn(async move { pool.run(worker).await })
            })
            .collect()
    }

    async fn run(self: Arc<Self>, worker: usize) {
        info!(worker, "job worker started");
        loop {
            match self.claim_next().await {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    error!(worker, %err, "queue poll failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claim the oldest due job. The single UPDATE keeps claims atomic
    /// across workers.
    async fn claim_next(&self) -> QueueResult<Option<ClaimedJob>> {
        let claimed = sqlx::query_as::<_, ClaimedJob>(
            "UPDATE jobs SET claimed = 1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE claimed = 0 AND run_at <= ?
                 ORDER BY run_at ASC, created_at ASC
                 LIMIT 1
             )
             RETURNING id, stage, payload",
        )
        .bind(Utc::now())
        .fetch_optional(&*self.db)
        .await?;
        Ok(claimed)
    }

    async fn execute(&self, job: ClaimedJob) {
        let outcome = self.dispatch(&job).await;
        match outcome {
            Ok(()) => {
                if let Err(err) = self.complete(job.id).await {
                    error!(job = %job.id, %err, "failed to delete completed job");
                }
            }
            Err(err) => {
                warn!(stage = %job.stage, job = %job.id, %err, "job failed, dead-lettering");
                if let Err(dead_err) = self.dead_letter(&job, &err.to_string()).await {
                    error!(job = %job.id, %dead_err, "failed to dead-letter job");
                }
            }
        }
    }

    async fn dispatch(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        let stage: Stage = job
            .stage
            .parse()
            .map_err(|_| PipelineError::validation(format!("unknown stage `{}`", job.stage)))?;
        let handler = self
            .handlers
            .get(&stage)
            .ok_or_else(|| {
                PipelineError::validation(format!("no handler registered for `{stage}`"))
            })?
            .clone();
        let payload: JobPayload = serde_json::from_str(&job.payload)
            .map_err(|err| PipelineError::validation(format!("undecodable payload: {err}")))?;
        handler.execute(payload).await
    }

    async fn complete(&self, id: Uuid) -> QueueResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, job: &ClaimedJob, error: &str) -> QueueResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO dead_jobs (id, stage, payload, error, failed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job.id)
        .bind(&job.stage)
        .bind(&job.payload)
        .bind(error)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::db::memory_pool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        stage: Stage,
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl StageHandler for CountingHandler {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn execute(&self, _payload: JobPayload) -> Result<(), PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PipelineError::external("engine exploded"))
            } else {
                Ok(())
            }
        }
    }

    fn payload() -> JobPayload {
        JobPayload {
            bucket: "ms-nogroup".into(),
            object: "source/IMG__1.jpg".into(),
            basename: "IMG__1.jpg".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delayed_jobs_are_not_claimable_yet() {
        let db = Arc::new(memory_pool().await);
        let queue = SqliteJobQueue::new(db.clone());
        queue
            .enqueue(Stage::Compress, &payload(), Duration::from_secs(3600))
            .await
            .unwrap();

        let workers = JobWorkers::new(db, Duration::from_millis(10));
        assert!(workers.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn successful_job_is_deleted() {
        let db = Arc::new(memory_pool().await);
        let queue = SqliteJobQueue::new(db.clone());
        queue
            .enqueue(Stage::Compress, &payload(), Duration::ZERO)
            .await
            .unwrap();

        let handler = Arc::new(CountingHandler {
            stage: Stage::Compress,
            runs: AtomicUsize::new(0),
            fail: false,
        });
        let mut workers = JobWorkers::new(db.clone(), Duration::from_millis(10));
        workers.register(handler.clone());

        let job = workers.claim_next().await.unwrap().unwrap();
        workers.execute(job).await;

        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&*db)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(list_dead_jobs(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_job_is_dead_lettered_not_retried() {
        let db = Arc::new(memory_pool().await);
        let queue = SqliteJobQueue::new(db.clone());
        queue
            .enqueue(Stage::Recognize, &payload(), Duration::ZERO)
            .await
            .unwrap();

        let handler = Arc::new(CountingHandler {
            stage: Stage::Recognize,
            runs: AtomicUsize::new(0),
            fail: true,
        });
        let mut workers = JobWorkers::new(db.clone(), Duration::from_millis(10));
        workers.register(handler.clone());

        let job = workers.claim_next().await.unwrap().unwrap();
        workers.execute(job).await;

        assert!(workers.claim_next().await.unwrap().is_none());
        let dead = list_dead_jobs(&db).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].stage, "recognize");
        assert!(dead[0].error.contains("engine exploded"));
    }

    #[tokio::test]
    async fn unregistered_stage_is_dead_lettered() {
        let db = Arc::new(memory_pool().await);
        let queue = SqliteJobQueue::new(db.clone());
        queue
            .enqueue(Stage::Video, &payload(), Duration::ZERO)
            .await
            .unwrap();

        let workers = JobWorkers::new(db.clone(), Duration::from_millis(10));
        let job = workers.claim_next().await.unwrap().unwrap();
        workers.execute(job).await;

        let dead = list_dead_jobs(&db).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].error.contains("no handler"));
    }
}
