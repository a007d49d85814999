//! Producer-side queue operations.
//!
//! `enqueue` is the single entry point for creating jobs. It is idempotent
//! per (job_type, entity_id): while a non-terminal job exists for the
//! target, further requests return [`EnqueueResult::Duplicate`] with the
//! existing id. Durability comes from the outbox pattern: the job row and
//! its notification commit together, the NATS publish afterwards is only a
//! latency optimization.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::Record;

use super::execution_log::{JobEvent, JobExecutionLog};
use super::job::{Job, JobStatus, JobType};
use super::outbox::JobOutbox;
use super::payload::JobPayload;

/// Outcome of an enqueue request.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueResult {
    /// A new job was created.
    Created { job_id: Uuid },
    /// A non-terminal job already covers this target.
    Duplicate { job_id: Uuid },
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created { job_id } | EnqueueResult::Duplicate { job_id } => *job_id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created { .. })
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The job was pending and is now cancelled.
    Cancelled,
    /// The job is running; the worker will observe the flag and stop at its
    /// next checkpoint.
    CancellationRequested,
    /// The job already reached a terminal status.
    AlreadyTerminal(JobStatus),
    NotFound,
}

/// Per-status job counts for the operator endpoints.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QueueCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl QueueCounts {
    pub async fn fetch(db: &PgPool) -> Result<Self> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(db)
        .await?;

        let mut counts = Self::default();
        for (status, count) in rows {
            match status {
                JobStatus::Pending => counts.pending = count,
                JobStatus::Running => counts.running = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
                JobStatus::Cancelled => counts.cancelled = count,
            }
        }

        Ok(counts)
    }
}

/// Wire format of a queue notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub entity_id: Uuid,
    pub payload: serde_json::Value,
}

impl QueueMessage {
    pub fn subject(job_type: JobType) -> String {
        format!("jobs.hydration.{}", job_type)
    }
}

/// Idempotent producer backed by Postgres, with NATS wake-ups.
#[derive(Clone)]
pub struct PostgresJobQueue {
    db_pool: PgPool,
    nats: async_nats::Client,
}

impl PostgresJobQueue {
    pub fn new(db_pool: PgPool, nats: async_nats::Client) -> Self {
        Self { db_pool, nats }
    }

    /// Enqueue a job for the payload's target, or return the existing one.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueResult> {
        let job_type = payload.job_type();
        let (entity_type, entity_id) = payload.target();

        // Fast path: a live job already covers this target.
        if let Some(existing) = Job::find_active(job_type, entity_id, &self.db_pool).await? {
            return Ok(EnqueueResult::Duplicate {
                job_id: existing.id,
            });
        }

        let job = Job::builder()
            .job_type(job_type)
            .entity_type(entity_type)
            .entity_id(entity_id)
            .payload(payload.to_value()?)
            .build();

        let message = QueueMessage {
            job_id: job.id,
            job_type,
            entity_id,
            payload: job.payload.clone(),
        };
        let subject = QueueMessage::subject(job_type);
        let message_value =
            serde_json::to_value(&message).context("serializing queue message")?;

        let mut tx = self.db_pool.begin().await?;

        let Some(inserted) = job.insert_unique_active(&mut *tx).await? else {
            // Lost the race against a concurrent producer; surface its job.
            tx.rollback().await?;
            let existing = Job::find_active(job_type, entity_id, &self.db_pool)
                .await?
                .context("duplicate job vanished between insert and lookup")?;
            return Ok(EnqueueResult::Duplicate {
                job_id: existing.id,
            });
        };

        let outbox =
            JobOutbox::insert_with(inserted.id, &subject, message_value, &mut *tx).await?;

        tx.commit().await?;

        info!(job_id = %inserted.id, %job_type, %entity_id, "enqueued job");

        // Best-effort wake-up; the relay sweep covers a missed publish.
        match serde_json::to_vec(&message) {
            Ok(bytes) => match self.nats.publish(subject, bytes.into()).await {
                Ok(()) => {
                    JobOutbox::mark_relayed(outbox.id, &self.db_pool).await?;
                }
                Err(error) => {
                    warn!(job_id = %inserted.id, %error, "queue publish failed; relay will retry");
                }
            },
            Err(error) => {
                warn!(job_id = %inserted.id, %error, "queue message not serializable");
            }
        }

        Ok(EnqueueResult::Created {
            job_id: inserted.id,
        })
    }

    /// Cancel a job. Pending jobs cancel immediately; running jobs get a
    /// cooperative flag and finish at the worker's next checkpoint.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome> {
        let Some(job) = Job::find_by_id(job_id, &self.db_pool).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        match job.status {
            JobStatus::Pending => {
                let mut tx = self.db_pool.begin().await?;

                let updated = sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'cancelled', updated_at = NOW()
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() == 0 {
                    // A worker claimed it between our read and the update.
                    tx.rollback().await?;
                    return self.request_running_cancel(job_id).await;
                }

                JobExecutionLog::append(
                    job_id,
                    JobEvent::Cancelled,
                    JobStatus::Pending,
                    JobStatus::Cancelled,
                    serde_json::json!({ "reason": "operator_request" }),
                    &mut *tx,
                )
                .await?;

                tx.commit().await?;
                info!(%job_id, "cancelled pending job");
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Running => self.request_running_cancel(job_id).await,
            terminal => Ok(CancelOutcome::AlreadyTerminal(terminal)),
        }
    }

    async fn request_running_cancel(&self, job_id: Uuid) -> Result<CancelOutcome> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET cancel_requested = TRUE, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.db_pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Status moved again; report whatever it is now.
            return match Job::find_by_id(job_id, &self.db_pool).await? {
                Some(job) if job.status.is_terminal() => {
                    Ok(CancelOutcome::AlreadyTerminal(job.status))
                }
                Some(_) => Ok(CancelOutcome::CancellationRequested),
                None => Ok(CancelOutcome::NotFound),
            };
        }

        info!(%job_id, "cancellation requested for running job");
        Ok(CancelOutcome::CancellationRequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_message_is_camel_case() {
        let message = QueueMessage {
            job_id: Uuid::new_v4(),
            job_type: JobType::Notes,
            entity_id: Uuid::new_v4(),
            payload: serde_json::json!({ "kind": "notes" }),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("jobId").is_some());
        assert!(json.get("jobType").is_some());
        assert!(json.get("entityId").is_some());
        assert_eq!(json["jobType"], "notes");
    }

    #[test]
    fn subject_encodes_job_type() {
        assert_eq!(QueueMessage::subject(JobType::Tests), "jobs.hydration.tests");
    }

    #[test]
    fn enqueue_result_exposes_job_id() {
        let id = Uuid::new_v4();
        assert_eq!(EnqueueResult::Created { job_id: id }.job_id(), id);
        assert!(!EnqueueResult::Duplicate { job_id: id }.is_created());
    }
}
