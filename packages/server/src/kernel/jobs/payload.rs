//! Typed job payloads.
//!
//! The Job row stores its payload as opaque JSONB; this module gives it a
//! shape. Payloads are a tagged union keyed by job type and are decoded at
//! the worker boundary; a payload whose tag disagrees with the row's
//! `job_type` is a terminal validation failure, not a retryable one.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{EntityType, Job, JobType};
use crate::kernel::error::EngineError;

fn default_question_count() -> u32 {
    10
}

/// Structured payload for each hydration stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Generate the syllabus outline (chapters and topics) for a subject.
    Syllabus {
        subject_id: Uuid,
        #[serde(default)]
        guidance: Option<String>,
    },
    /// Generate study notes for a topic.
    Notes {
        topic_id: Uuid,
        #[serde(default)]
        regenerate: bool,
    },
    /// Generate practice questions for a topic.
    Questions {
        topic_id: Uuid,
        #[serde(default = "default_question_count")]
        count: u32,
    },
    /// Generate a chapter test.
    Tests {
        chapter_id: Uuid,
        #[serde(default = "default_question_count")]
        question_count: u32,
    },
    /// Assemble the finished course artifact for a subject.
    Assemble { subject_id: Uuid },
}

impl JobPayload {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Syllabus { .. } => JobType::Syllabus,
            JobPayload::Notes { .. } => JobType::Notes,
            JobPayload::Questions { .. } => JobType::Questions,
            JobPayload::Tests { .. } => JobType::Tests,
            JobPayload::Assemble { .. } => JobType::Assemble,
        }
    }

    /// The domain target this payload operates on.
    pub fn target(&self) -> (EntityType, Uuid) {
        match self {
            JobPayload::Syllabus { subject_id, .. } => (EntityType::Subject, *subject_id),
            JobPayload::Notes { topic_id, .. } => (EntityType::Topic, *topic_id),
            JobPayload::Questions { topic_id, .. } => (EntityType::Topic, *topic_id),
            JobPayload::Tests { chapter_id, .. } => (EntityType::Chapter, *chapter_id),
            JobPayload::Assemble { subject_id } => (EntityType::Subject, *subject_id),
        }
    }

    /// Serialize for storage on the Job row.
    pub fn to_value(&self) -> Result<serde_json::Value, EngineError> {
        serde_json::to_value(self).map_err(|e| EngineError::Payload(e.to_string()))
    }

    /// Decode and validate a job's stored payload.
    pub fn decode(job: &Job) -> Result<Self, EngineError> {
        let payload: JobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| EngineError::Payload(format!("job {}: {}", job.id, e)))?;

        if payload.job_type() != job.job_type {
            return Err(EngineError::Payload(format!(
                "job {}: payload kind '{}' does not match job type '{}'",
                job.id,
                payload.job_type(),
                job.job_type
            )));
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_payload(job_type: JobType, payload: serde_json::Value) -> Job {
        let (entity_type, entity_id) = (EntityType::Topic, Uuid::new_v4());
        Job::builder()
            .job_type(job_type)
            .entity_type(entity_type)
            .entity_id(entity_id)
            .payload(payload)
            .build()
    }

    #[test]
    fn notes_payload_roundtrip() {
        let topic_id = Uuid::new_v4();
        let payload = JobPayload::Notes {
            topic_id,
            regenerate: true,
        };
        let value = payload.to_value().unwrap();
        assert_eq!(value["kind"], "notes");

        let decoded: JobPayload = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn decode_accepts_matching_kind() {
        let topic_id = Uuid::new_v4();
        let job = job_with_payload(
            JobType::Notes,
            serde_json::json!({ "kind": "notes", "topic_id": topic_id }),
        );

        let payload = JobPayload::decode(&job).unwrap();
        assert_eq!(payload, JobPayload::Notes { topic_id, regenerate: false });
    }

    #[test]
    fn decode_rejects_kind_mismatch() {
        let job = job_with_payload(
            JobType::Questions,
            serde_json::json!({ "kind": "notes", "topic_id": Uuid::new_v4() }),
        );

        let err = JobPayload::decode(&job).unwrap_err();
        assert!(matches!(err, EngineError::Payload(_)));
    }

    #[test]
    fn decode_rejects_garbage() {
        let job = job_with_payload(JobType::Notes, serde_json::json!({ "kind": "unknown" }));
        assert!(JobPayload::decode(&job).is_err());
    }

    #[test]
    fn question_count_defaults() {
        let value = serde_json::json!({ "kind": "questions", "topic_id": Uuid::new_v4() });
        let decoded: JobPayload = serde_json::from_value(value).unwrap();
        match decoded {
            JobPayload::Questions { count, .. } => assert_eq!(count, 10),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn target_points_at_payload_entity() {
        let subject_id = Uuid::new_v4();
        let payload = JobPayload::Assemble { subject_id };
        assert_eq!(payload.target(), (EntityType::Subject, subject_id));
        assert_eq!(payload.job_type(), JobType::Assemble);
    }
}
