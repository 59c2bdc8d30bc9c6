//! Durable at-least-once job queue on top of the `job_queue` table.
//!
//! Row lifecycle: `queued -> processing -> {processed | abandoned | failed}`,
//! with `processing -> queued` on a requested retry. A `processing` row whose
//! claim is older than the claim timeout is claimable again; taking it over
//! counts as a redelivery.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;

use prsync_core::domain::job::{Job, JobId};
use prsync_core::errors::{ApplicationError, ErrorKind};

use crate::repositories::classify_sqlx;
use crate::DbPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Queued,
    Processing,
    Processed,
    Abandoned,
    Failed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "abandoned" => Some(Self::Abandoned),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One claimed job plus the number of times it was delivered before.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub job: Job,
    pub retry_count: u32,
}

/// How a delivery ended, as reported by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Processed,
    Retry { error: String, delay: Duration },
    Failed { error: String },
    /// Retry budget exhausted: final, no further redelivery.
    Abandoned { error: String },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not encode job payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("queue row `{id}` could not be decoded: {reason}")]
    Decode { id: String, reason: String },
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(error) => classify_sqlx(error),
            Self::Encode(_) | Self::Decode { .. } => ErrorKind::PermanentDependency,
        }
    }
}

impl From<QueueError> for ApplicationError {
    fn from(error: QueueError) -> Self {
        ApplicationError::from_kind(error.kind(), error.to_string())
    }
}

/// Producer side, used by ingress and by processors that fan out follow-up jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;
}

/// Consumer side, used by the queue worker.
#[async_trait]
pub trait JobStore: JobQueue {
    async fn claim_next(
        &self,
        worker_id: &str,
        claim_timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    async fn settle(&self, job_id: &JobId, settlement: Settlement) -> Result<(), QueueError>;
}

pub struct SqlJobQueue {
    pool: DbPool,
}

impl SqlJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn state_of(&self, job_id: &JobId) -> Result<Option<(QueueState, u32)>, QueueError> {
        let row = sqlx::query("SELECT state, retry_count FROM job_queue WHERE id = ?")
            .bind(&job_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<(QueueState, u32), QueueError> {
            let raw = row.try_get::<String, _>("state")?;
            let state = QueueState::parse(&raw).ok_or_else(|| QueueError::Decode {
                id: job_id.0.clone(),
                reason: format!("unknown state `{raw}`"),
            })?;
            let retry_count = decode_retry_count(&job_id.0, row.try_get("retry_count")?)?;
            Ok((state, retry_count))
        })
        .transpose()
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn decode_retry_count(id: &str, value: i64) -> Result<u32, QueueError> {
    u32::try_from(value).map_err(|_| QueueError::Decode {
        id: id.to_string(),
        reason: format!("invalid retry_count {value}"),
    })
}

#[async_trait]
impl JobQueue for SqlJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO job_queue (
                id, trace_id, kind, payload_json, state, retry_count, available_at,
                claimed_by, claimed_at, last_error, created_at, updated_at
             ) VALUES (?, ?, ?, ?, 'queued', 0, ?, NULL, NULL, NULL, ?, ?)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&job.id.0)
        .bind(&job.trace_id.0)
        .bind(job.kind.as_str())
        .bind(payload)
        .bind(now_millis())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl JobStore for SqlJobQueue {
    async fn claim_next(
        &self,
        worker_id: &str,
        claim_timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let now = now_millis();
        let stale_before = now.saturating_sub(duration_millis(claim_timeout));

        // SET expressions see the pre-update row, so `state` below is the old state.
        let row = sqlx::query(
            "UPDATE job_queue
             SET state = 'processing',
                 retry_count = retry_count + CASE WHEN state = 'processing' THEN 1 ELSE 0 END,
                 claimed_by = ?,
                 claimed_at = ?,
                 updated_at = ?
             WHERE id = (
                SELECT id FROM job_queue
                WHERE (state = 'queued' AND available_at <= ?)
                   OR (state = 'processing' AND claimed_at <= ?)
                ORDER BY available_at ASC, created_at ASC
                LIMIT 1
             )
             RETURNING id, payload_json, retry_count",
        )
        .bind(worker_id)
        .bind(now)
        .bind(Utc::now().to_rfc3339())
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id = row.try_get::<String, _>("id")?;
        let payload = row.try_get::<String, _>("payload_json")?;
        let retry_count = decode_retry_count(&id, row.try_get("retry_count")?)?;
        let job = serde_json::from_str::<Job>(&payload)
            .map_err(|error| QueueError::Decode { id: id.clone(), reason: error.to_string() })?;

        Ok(Some(Delivery { job, retry_count }))
    }

    async fn settle(&self, job_id: &JobId, settlement: Settlement) -> Result<(), QueueError> {
        let updated_at = Utc::now().to_rfc3339();
        match settlement {
            Settlement::Retry { error, delay } => {
                sqlx::query(
                    "UPDATE job_queue
                     SET state = 'queued',
                         retry_count = retry_count + 1,
                         available_at = ?,
                         claimed_by = NULL,
                         claimed_at = NULL,
                         last_error = ?,
                         updated_at = ?
                     WHERE id = ? AND state = 'processing'",
                )
                .bind(now_millis().saturating_add(duration_millis(delay)))
                .bind(error)
                .bind(updated_at)
                .bind(&job_id.0)
                .execute(&self.pool)
                .await?;
            }
            Settlement::Processed => {
                finish(&self.pool, job_id, QueueState::Processed, None, &updated_at).await?;
            }
            Settlement::Failed { error } => {
                finish(&self.pool, job_id, QueueState::Failed, Some(error), &updated_at).await?;
            }
            Settlement::Abandoned { error } => {
                finish(&self.pool, job_id, QueueState::Abandoned, Some(error), &updated_at)
                    .await?;
            }
        }

        Ok(())
    }
}

async fn finish(
    pool: &DbPool,
    job_id: &JobId,
    state: QueueState,
    error: Option<String>,
    updated_at: &str,
) -> Result<(), QueueError> {
    sqlx::query(
        "UPDATE job_queue
         SET state = ?, last_error = COALESCE(?, last_error), claimed_by = NULL, updated_at = ?
         WHERE id = ? AND state = 'processing'",
    )
    .bind(state.as_str())
    .bind(error)
    .bind(updated_at)
    .bind(&job_id.0)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Clone, Debug)]
struct MemoryRow {
    job: Job,
    state: QueueState,
    retry_count: u32,
    last_error: Option<String>,
}

/// Queue double that records every job and settlement. Delays are ignored so
/// tests can drain retries immediately.
#[derive(Default)]
pub struct InMemoryJobQueue {
    rows: Mutex<Vec<MemoryRow>>,
    fail_enqueue: std::sync::atomic::AtomicBool,
}

impl InMemoryJobQueue {
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.rows.lock().await.iter().map(|row| row.job.clone()).collect()
    }

    pub async fn state_of(&self, job_id: &JobId) -> Option<(QueueState, u32, Option<String>)> {
        self.rows
            .lock()
            .await
            .iter()
            .find(|row| &row.job.id == job_id)
            .map(|row| (row.state, row.retry_count, row.last_error.clone()))
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        if self.fail_enqueue.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(QueueError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut rows = self.rows.lock().await;
        if rows.iter().all(|row| row.job.id != job.id) {
            rows.push(MemoryRow {
                job: job.clone(),
                state: QueueState::Queued,
                retry_count: 0,
                last_error: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobQueue {
    async fn claim_next(
        &self,
        _worker_id: &str,
        _claim_timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.iter_mut().find(|row| row.state == QueueState::Queued) else {
            return Ok(None);
        };
        row.state = QueueState::Processing;
        Ok(Some(Delivery { job: row.job.clone(), retry_count: row.retry_count }))
    }

    async fn settle(&self, job_id: &JobId, settlement: Settlement) -> Result<(), QueueError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows
            .iter_mut()
            .find(|row| &row.job.id == job_id && row.state == QueueState::Processing)
        else {
            return Ok(());
        };

        match settlement {
            Settlement::Processed => row.state = QueueState::Processed,
            Settlement::Retry { error, .. } => {
                row.state = QueueState::Queued;
                row.retry_count += 1;
                row.last_error = Some(error);
            }
            Settlement::Failed { error } => {
                row.state = QueueState::Failed;
                row.last_error = Some(error);
            }
            Settlement::Abandoned { error } => {
                row.state = QueueState::Abandoned;
                row.last_error = Some(error);
            }
        }
        Ok(())
    }
}

/// Number of queue rows per state; used by the CLI status command.
pub async fn state_counts(pool: &DbPool) -> Result<HashMap<String, i64>, QueueError> {
    let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM job_queue GROUP BY state")
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|row| -> Result<(String, i64), QueueError> {
            Ok((row.try_get::<String, _>("state")?, row.try_get::<i64, _>("count")?))
        })
        .collect()
}
