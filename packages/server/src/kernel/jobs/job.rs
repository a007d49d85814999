//! Job model for content-generation work.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::Record;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// The hydration stage a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Syllabus,
    Notes,
    Questions,
    Tests,
    Assemble,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Syllabus => "syllabus",
            JobType::Notes => "notes",
            JobType::Questions => "questions",
            JobType::Tests => "tests",
            JobType::Assemble => "assemble",
        }
    }

    /// Upper-case category name used in operator-facing error tags.
    pub fn category(&self) -> &'static str {
        match self {
            JobType::Syllabus => "SYLLABUS",
            JobType::Notes => "NOTES",
            JobType::Questions => "QUESTIONS",
            JobType::Tests => "TESTS",
            JobType::Assemble => "ASSEMBLE",
        }
    }

    /// System-setting key that disables this category while AI_PAUSED is set.
    pub fn disable_flag(&self) -> String {
        format!("HYDRATION_DISABLED_{}", self.category())
    }

    /// Error tag surfaced when a paused job is skipped.
    pub fn disabled_tag(&self) -> String {
        format!("{}_DISABLED", self.category())
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of domain entity a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entity_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Subject,
    Chapter,
    Topic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Subject => "subject",
            EntityType::Chapter => "chapter",
            EntityType::Topic => "topic",
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// A durable unit of hydration work.
///
/// At most one non-terminal (pending or running) job may exist per
/// (job_type, entity_id); a partial unique index backs the producer's
/// idempotency check.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    // Core identity
    pub job_type: JobType,
    pub entity_type: EntityType,
    pub entity_id: Uuid,

    // State
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default = 3)]
    pub max_attempts: i32,

    // Payload
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    // Retry / backoff schedule
    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,

    // Cooperative cancellation flag for running jobs
    #[builder(default = false)]
    pub cancel_requested: bool,

    // Claim bookkeeping
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = "id, job_type, entity_type, entity_id, status, attempts, max_attempts, \
                           payload, last_error, next_run_at, cancel_requested, worker_id, \
                           created_at, updated_at";

impl Job {
    /// Logical resource key serializing all jobs touching the same target.
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.job_type, self.entity_id)
    }

    /// Check if the job is ready to run.
    pub fn is_ready(&self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }

        match self.next_run_at {
            None => true,
            Some(next_run) => next_run <= Utc::now(),
        }
    }

    /// Find the live (pending or running) job for a target, if any.
    pub async fn find_active(
        job_type: JobType,
        entity_id: Uuid,
        db: &PgPool,
    ) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE job_type = $1 AND entity_id = $2 AND status IN ('pending', 'running')
            LIMIT 1
            "#,
        ))
        .bind(job_type)
        .bind(entity_id)
        .fetch_optional(db)
        .await?;

        Ok(job)
    }

    /// Find jobs that are ready to run (for worker polling).
    pub async fn find_ready(limit: i64, db: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'pending'
              AND (next_run_at IS NULL OR next_run_at <= NOW())
            ORDER BY COALESCE(next_run_at, created_at) ASC
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    /// Running jobs whose lock lease has lapsed (crashed or hung worker).
    pub async fn find_orphaned(limit: i64, db: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs j
            WHERE j.status = 'running'
              AND NOT EXISTS (
                  SELECT 1 FROM job_locks l
                  WHERE l.key = j.job_type::text || ':' || j.entity_id::text
                    AND l.expires_at > NOW()
              )
            ORDER BY j.updated_at ASC
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    /// Insert unless a non-terminal job already exists for the same target.
    ///
    /// Returns `None` when the partial unique index rejected the row, i.e.
    /// a concurrent producer won the race.
    pub async fn insert_unique_active<'e, E>(&self, executor: E) -> Result<Option<Self>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO jobs (
                id, job_type, entity_type, entity_id, status, attempts, max_attempts,
                payload, last_error, next_run_at, cancel_requested, worker_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (job_type, entity_id) WHERE status IN ('pending', 'running')
            DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.job_type)
        .bind(self.entity_type)
        .bind(self.entity_id)
        .bind(self.status)
        .bind(self.attempts)
        .bind(self.max_attempts)
        .bind(&self.payload)
        .bind(&self.last_error)
        .bind(self.next_run_at)
        .bind(self.cancel_requested)
        .bind(&self.worker_id)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_optional(executor)
        .await?;

        Ok(job)
    }
}

#[async_trait::async_trait]
impl Record for Job {
    const TABLE: &'static str = "jobs";
    type Id = Uuid;

    async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;

        Ok(job)
    }

    async fn insert(&self, db: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO jobs (
                id, job_type, entity_type, entity_id, status, attempts, max_attempts,
                payload, last_error, next_run_at, cancel_requested, worker_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.job_type)
        .bind(self.entity_type)
        .bind(self.entity_id)
        .bind(self.status)
        .bind(self.attempts)
        .bind(self.max_attempts)
        .bind(&self.payload)
        .bind(&self.last_error)
        .bind(self.next_run_at)
        .bind(self.cancel_requested)
        .bind(&self.worker_id)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::builder()
            .job_type(JobType::Notes)
            .entity_type(EntityType::Topic)
            .entity_id(Uuid::new_v4())
            .build()
    }

    #[test]
    fn new_job_starts_with_pending_status() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
    }

    #[test]
    fn lock_key_combines_type_and_entity() {
        let job = sample_job();
        assert_eq!(job.lock_key(), format!("notes:{}", job.entity_id));
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn is_ready_pending_without_schedule() {
        let job = sample_job();
        assert!(job.is_ready());
    }

    #[test]
    fn is_ready_respects_future_next_run() {
        let mut job = sample_job();
        job.next_run_at = Some(Utc::now() + chrono::Duration::minutes(5));
        assert!(!job.is_ready());
    }

    #[test]
    fn is_ready_running_job_is_not_ready() {
        let mut job = sample_job();
        job.status = JobStatus::Running;
        assert!(!job.is_ready());
    }

    #[test]
    fn disable_flag_names_category() {
        assert_eq!(JobType::Notes.disable_flag(), "HYDRATION_DISABLED_NOTES");
        assert_eq!(JobType::Syllabus.disabled_tag(), "SYLLABUS_DISABLED");
    }

    #[test]
    fn job_type_display_is_snake_case() {
        assert_eq!(JobType::Syllabus.to_string(), "syllabus");
        assert_eq!(JobType::Assemble.to_string(), "assemble");
    }
}
