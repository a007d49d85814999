//! Storage seam between the worker and its durable state.
//!
//! The worker talks to a [`JobStore`] trait rather than the pool directly,
//! so the full claim/execute/settle protocol can run against the in-memory
//! store in tests. Every mutating method is a guarded conditional update:
//! it succeeds only from the expected prior status (and, for settlements,
//! only while the caller still owns the claim) and pairs the status change
//! with its audit log row in one transaction. A `false` return means the
//! guard did not match (someone else moved the job first) and the caller
//! must drop its claim.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::common::Record;
use crate::kernel::settings::SystemSetting;

use super::execution_log::{JobEvent, JobExecutionLog};
use super::job::{Job, JobStatus};
use super::lock::JobLock;

#[async_trait::async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Load a job by id.
    async fn fetch(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Pending jobs whose schedule is due, oldest first.
    async fn next_ready(&self, limit: i64) -> Result<Vec<Job>>;

    /// Requeue running jobs whose lock lease lapsed. No attempt is
    /// consumed; the interruption was not the job's fault. Returns the ids
    /// recovered.
    async fn recover_stale(&self, limit: i64) -> Result<Vec<Uuid>>;

    /// pending → running, claiming the job for `worker_id`.
    async fn start(&self, job_id: Uuid, worker_id: &str) -> Result<bool>;

    /// running → completed. Applies only while `worker_id` still owns the
    /// claim: a job that was recovered and re-claimed after our lease
    /// lapsed belongs to its new holder, and our settlement must no-op.
    async fn complete(&self, job_id: Uuid, worker_id: &str, meta: serde_json::Value)
        -> Result<bool>;

    /// running → pending with an incremented attempt counter and a backoff
    /// schedule. Claim-guarded like [`JobStore::complete`].
    async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// running → failed (terminal). `event` distinguishes an ordinary
    /// failure from a detected stale-lock steal. Claim-guarded like
    /// [`JobStore::complete`].
    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str, event: JobEvent)
        -> Result<bool>;

    /// running → cancelled, for cooperative cancellation. Claim-guarded
    /// like [`JobStore::complete`].
    async fn cancel_running(&self, job_id: Uuid, worker_id: &str, reason: &str) -> Result<bool>;

    /// Push a paused job's schedule out without consuming an attempt. The
    /// job stays pending; `tag` lands in `last_error` for operators.
    async fn pause_requeue(&self, job_id: Uuid, tag: &str, next_run_at: DateTime<Utc>)
        -> Result<bool>;

    async fn acquire_lock(&self, key: &str, holder: &str, lease_ms: i64) -> Result<bool>;
    async fn renew_lock(&self, key: &str, holder: &str, lease_ms: i64) -> Result<bool>;
    async fn release_lock(&self, key: &str, holder: &str) -> Result<()>;
    async fn lock_holder(&self, key: &str) -> Result<Option<String>>;

    /// Read a system setting.
    async fn setting(&self, key: &str) -> Result<Option<String>>;
}

/// Production store backed by the shared pool.
#[derive(Clone)]
pub struct PostgresJobStore {
    db_pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    async fn fetch(&self, job_id: Uuid) -> Result<Option<Job>> {
        Job::find_by_id(job_id, &self.db_pool).await
    }

    async fn next_ready(&self, limit: i64) -> Result<Vec<Job>> {
        Job::find_ready(limit, &self.db_pool).await
    }

    async fn recover_stale(&self, limit: i64) -> Result<Vec<Uuid>> {
        let orphaned = Job::find_orphaned(limit, &self.db_pool).await?;
        let mut recovered = Vec::new();

        for job in orphaned {
            let mut tx = self.db_pool.begin().await?;

            let updated = sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending', worker_id = NULL, next_run_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(job.id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                tx.rollback().await?;
                continue;
            }

            JobExecutionLog::append(
                job.id,
                JobEvent::Retry,
                JobStatus::Running,
                JobStatus::Pending,
                serde_json::json!({ "reason": "lease_expired", "worker_id": job.worker_id }),
                &mut *tx,
            )
            .await?;

            tx.commit().await?;
            info!(job_id = %job.id, "recovered job with lapsed lease");
            recovered.push(job.id);
        }

        Ok(recovered)
    }

    async fn start(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let mut tx = self.db_pool.begin().await?;

        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE jobs
            SET status = 'running', worker_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING attempts
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempts) = attempts else {
            tx.rollback().await?;
            return Ok(false);
        };

        JobExecutionLog::append(
            job_id,
            JobEvent::Started,
            JobStatus::Pending,
            JobStatus::Running,
            serde_json::json!({ "worker_id": worker_id, "attempt": attempts + 1 }),
            &mut *tx,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        meta: serde_json::Value,
    ) -> Result<bool> {
        let mut tx = self.db_pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND worker_id = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        JobExecutionLog::append(
            job_id,
            JobEvent::Completed,
            JobStatus::Running,
            JobStatus::Completed,
            meta,
            &mut *tx,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.db_pool.begin().await?;

        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = attempts + 1, last_error = $2,
                next_run_at = $3, worker_id = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND worker_id = $4
            RETURNING attempts
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(next_run_at)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempts) = attempts else {
            tx.rollback().await?;
            return Ok(false);
        };

        JobExecutionLog::append(
            job_id,
            JobEvent::Retry,
            JobStatus::Running,
            JobStatus::Pending,
            serde_json::json!({ "error": error, "attempts": attempts, "next_run_at": next_run_at }),
            &mut *tx,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        event: JobEvent,
    ) -> Result<bool> {
        let mut tx = self.db_pool.begin().await?;

        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE jobs
            SET status = 'failed', attempts = attempts + 1, last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND worker_id = $3
            RETURNING attempts
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempts) = attempts else {
            tx.rollback().await?;
            return Ok(false);
        };

        JobExecutionLog::append(
            job_id,
            event,
            JobStatus::Running,
            JobStatus::Failed,
            serde_json::json!({ "error": error, "attempts": attempts }),
            &mut *tx,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn cancel_running(&self, job_id: Uuid, worker_id: &str, reason: &str) -> Result<bool> {
        let mut tx = self.db_pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', worker_id = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND worker_id = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        JobExecutionLog::append(
            job_id,
            JobEvent::Cancelled,
            JobStatus::Running,
            JobStatus::Cancelled,
            serde_json::json!({ "reason": reason }),
            &mut *tx,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn pause_requeue(
        &self,
        job_id: Uuid,
        tag: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.db_pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET last_error = $2, next_run_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(tag)
        .bind(next_run_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        JobExecutionLog::append(
            job_id,
            JobEvent::Paused,
            JobStatus::Pending,
            JobStatus::Pending,
            serde_json::json!({ "tag": tag, "next_run_at": next_run_at }),
            &mut *tx,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn acquire_lock(&self, key: &str, holder: &str, lease_ms: i64) -> Result<bool> {
        JobLock::acquire(key, holder, lease_ms, &self.db_pool).await
    }

    async fn renew_lock(&self, key: &str, holder: &str, lease_ms: i64) -> Result<bool> {
        JobLock::renew(key, holder, lease_ms, &self.db_pool).await
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<()> {
        JobLock::release(key, holder, &self.db_pool).await
    }

    async fn lock_holder(&self, key: &str) -> Result<Option<String>> {
        JobLock::holder_of(key, &self.db_pool).await
    }

    async fn setting(&self, key: &str) -> Result<Option<String>> {
        SystemSetting::get(key, &self.db_pool).await
    }
}
