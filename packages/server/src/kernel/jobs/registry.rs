//! Handler registry mapping job types to hydration logic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::debug;

use crate::kernel::error::EngineError;

use super::job::{Job, JobType};
use super::payload::JobPayload;

type BoxedHandler = Box<
    dyn Fn(Job, JobPayload) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send>>
        + Send
        + Sync,
>;

/// Dispatch table for job execution.
///
/// Handlers receive the job row and its decoded payload and return a JSON
/// summary that lands in the COMPLETED log row's meta. Registration happens
/// once at worker startup; the registry is immutable afterwards.
#[derive(Default)]
pub struct HydrationRegistry {
    handlers: HashMap<JobType, BoxedHandler>,
}

impl HydrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a job type, replacing any existing one.
    pub fn register<F, Fut>(&mut self, job_type: JobType, handler: F)
    where
        F: Fn(Job, JobPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, EngineError>> + Send + 'static,
    {
        debug!(%job_type, "registered job handler");
        self.handlers
            .insert(job_type, Box::new(move |job, payload| Box::pin(handler(job, payload))));
    }

    pub fn has_handler(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Decode the job's payload and run its handler.
    pub async fn execute(&self, job: Job) -> Result<Value, EngineError> {
        let payload = JobPayload::decode(&job)?;

        let handler = self.handlers.get(&job.job_type).ok_or_else(|| {
            EngineError::Payload(format!("no handler registered for job type '{}'", job.job_type))
        })?;

        handler(job, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::job::EntityType;
    use uuid::Uuid;

    fn notes_job(topic_id: Uuid) -> Job {
        Job::builder()
            .job_type(JobType::Notes)
            .entity_type(EntityType::Topic)
            .entity_id(topic_id)
            .payload(serde_json::json!({ "kind": "notes", "topic_id": topic_id }))
            .build()
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let mut registry = HydrationRegistry::new();
        registry.register(JobType::Notes, |_job, payload| async move {
            match payload {
                JobPayload::Notes { topic_id, .. } => {
                    Ok(serde_json::json!({ "topic_id": topic_id }))
                }
                other => Err(EngineError::Payload(format!("unexpected: {:?}", other))),
            }
        });

        let topic_id = Uuid::new_v4();
        let result = registry.execute(notes_job(topic_id)).await.unwrap();
        assert_eq!(result["topic_id"], serde_json::json!(topic_id));
    }

    #[tokio::test]
    async fn missing_handler_is_a_payload_error() {
        let registry = HydrationRegistry::new();
        let err = registry.execute(notes_job(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, EngineError::Payload(_)));
    }

    #[tokio::test]
    async fn bad_payload_fails_before_dispatch() {
        let mut registry = HydrationRegistry::new();
        registry.register(JobType::Notes, |_job, _payload| async move {
            panic!("handler must not run for an invalid payload");
        });

        let mut job = notes_job(Uuid::new_v4());
        job.payload = serde_json::json!({ "kind": "syllabus" });

        assert!(registry.execute(job).await.is_err());
    }
}
