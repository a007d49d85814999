//! Producer-side entry points for hydration requests.
//!
//! Every request validates its target exists before enqueueing, so a job
//! row never points at a missing entity. Idempotency lives in the queue:
//! repeated requests for the same live target return the existing job id.

use sqlx::PgPool;
use uuid::Uuid;

use crate::common::Record;
use crate::kernel::error::EngineError;
use crate::kernel::jobs::{EnqueueResult, JobPayload, PostgresJobQueue};

use super::catalog::{Chapter, Subject, Topic};

/// Turns API-level hydration requests into queued jobs.
#[derive(Clone)]
pub struct HydrationProducer {
    db_pool: PgPool,
    queue: PostgresJobQueue,
}

impl HydrationProducer {
    pub fn new(db_pool: PgPool, queue: PostgresJobQueue) -> Self {
        Self { db_pool, queue }
    }

    pub async fn request_syllabus(
        &self,
        subject_id: Uuid,
        guidance: Option<String>,
    ) -> Result<EnqueueResult, EngineError> {
        self.require_subject(subject_id).await?;
        let result = self
            .queue
            .enqueue(JobPayload::Syllabus {
                subject_id,
                guidance,
            })
            .await?;
        Ok(result)
    }

    pub async fn request_notes(
        &self,
        topic_id: Uuid,
        regenerate: bool,
    ) -> Result<EnqueueResult, EngineError> {
        self.require_topic(topic_id).await?;
        let result = self
            .queue
            .enqueue(JobPayload::Notes {
                topic_id,
                regenerate,
            })
            .await?;
        Ok(result)
    }

    pub async fn request_questions(
        &self,
        topic_id: Uuid,
        count: u32,
    ) -> Result<EnqueueResult, EngineError> {
        self.require_topic(topic_id).await?;
        let result = self
            .queue
            .enqueue(JobPayload::Questions { topic_id, count })
            .await?;
        Ok(result)
    }

    pub async fn request_tests(
        &self,
        chapter_id: Uuid,
        question_count: u32,
    ) -> Result<EnqueueResult, EngineError> {
        if Chapter::find_by_id(chapter_id, &self.db_pool).await?.is_none() {
            return Err(EngineError::NotFound(format!("chapter {}", chapter_id)));
        }
        let result = self
            .queue
            .enqueue(JobPayload::Tests {
                chapter_id,
                question_count,
            })
            .await?;
        Ok(result)
    }

    pub async fn request_assemble(&self, subject_id: Uuid) -> Result<EnqueueResult, EngineError> {
        self.require_subject(subject_id).await?;
        let result = self.queue.enqueue(JobPayload::Assemble { subject_id }).await?;
        Ok(result)
    }

    /// Enqueue from an already-typed payload (admin job submission).
    pub async fn request(&self, payload: JobPayload) -> Result<EnqueueResult, EngineError> {
        match &payload {
            JobPayload::Syllabus { subject_id, .. } | JobPayload::Assemble { subject_id } => {
                self.require_subject(*subject_id).await?;
            }
            JobPayload::Notes { topic_id, .. } | JobPayload::Questions { topic_id, .. } => {
                self.require_topic(*topic_id).await?;
            }
            JobPayload::Tests { chapter_id, .. } => {
                if Chapter::find_by_id(*chapter_id, &self.db_pool).await?.is_none() {
                    return Err(EngineError::NotFound(format!("chapter {}", chapter_id)));
                }
            }
        }

        let result = self.queue.enqueue(payload).await?;
        Ok(result)
    }

    async fn require_subject(&self, subject_id: Uuid) -> Result<(), EngineError> {
        if Subject::find_by_id(subject_id, &self.db_pool).await?.is_none() {
            return Err(EngineError::NotFound(format!("subject {}", subject_id)));
        }
        Ok(())
    }

    async fn require_topic(&self, topic_id: Uuid) -> Result<(), EngineError> {
        if Topic::find_by_id(topic_id, &self.db_pool).await?.is_none() {
            return Err(EngineError::NotFound(format!("topic {}", topic_id)));
        }
        Ok(())
    }
}
