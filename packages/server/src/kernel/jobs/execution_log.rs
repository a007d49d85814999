//! Append-only execution log.
//!
//! One row per state transition (or policy skip), never mutated or
//! deleted. The admin timeline endpoint reads these rows ascending by
//! creation time; the audit invariant is that no status transition
//! happens without its paired log row, which the store enforces by
//! writing both in one transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::job::JobStatus;

/// Job lifecycle events recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_event", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    /// An attempt began (pending → running).
    Started,
    /// The job finished successfully (running → completed).
    Completed,
    /// The job failed terminally (running → failed).
    Failed,
    /// A failed attempt was rescheduled (running → pending), or a lapsed
    /// lease was recovered.
    Retry,
    /// The job was skipped because its category is paused; no attempt was
    /// consumed.
    Paused,
    /// The job was cancelled by an operator.
    Cancelled,
    /// The worker lost its lock lease mid-execution to another claimant.
    StaleLock,
}

/// A single audit-trail row.
#[derive(FromRow, Debug, Clone, Serialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub event: JobEvent,
    pub prev_status: JobStatus,
    pub new_status: JobStatus,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl JobExecutionLog {
    /// Append one row. Callers run this inside the same transaction as the
    /// status update it documents.
    pub async fn append<'e, E>(
        job_id: Uuid,
        event: JobEvent,
        prev_status: JobStatus,
        new_status: JobStatus,
        meta: serde_json::Value,
        executor: E,
    ) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO job_execution_logs (id, job_id, event, prev_status, new_status, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id, job_id, event, prev_status, new_status, meta, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(event)
        .bind(prev_status)
        .bind(new_status)
        .bind(meta)
        .fetch_one(executor)
        .await?;

        Ok(row)
    }

    /// Full timeline for a job, oldest first.
    pub async fn timeline(job_id: Uuid, db: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, job_id, event, prev_status, new_status, meta, created_at
            FROM job_execution_logs
            WHERE job_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(db)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobEvent::StaleLock).unwrap(),
            "\"stale_lock\""
        );
        assert_eq!(
            serde_json::to_string(&JobEvent::Started).unwrap(),
            "\"started\""
        );
    }

    #[test]
    fn log_row_serializes_for_timeline_api() {
        let row = JobExecutionLog {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            event: JobEvent::Retry,
            prev_status: JobStatus::Running,
            new_status: JobStatus::Pending,
            meta: serde_json::json!({ "error": "timeout", "attempts": 1 }),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["event"], "retry");
        assert_eq!(json["prev_status"], "running");
        assert_eq!(json["new_status"], "pending");
        assert_eq!(json["meta"]["attempts"], 1);
    }
}
