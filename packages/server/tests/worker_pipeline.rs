//! End-to-end worker protocol tests against the in-memory store.
//!
//! These drive the full claim/execute/settle state machine: success,
//! bounded retries, pause flags, duplicate delivery, lock contention,
//! stale-lock steals, cooperative cancellation, crash recovery, and the
//! audit-trail pairing of every transition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use engine_core::kernel::error::EngineError;
use engine_core::kernel::jobs::testing::InMemoryJobStore;
use engine_core::kernel::jobs::{
    EntityType, HydrationRegistry, Job, JobEvent, JobStatus, JobStore, JobType, JobWorker,
    JobWorkerConfig, ProcessOutcome, SkipReason,
};
use engine_core::kernel::settings::AI_PAUSED;

fn notes_job(topic_id: Uuid) -> Job {
    Job::builder()
        .job_type(JobType::Notes)
        .entity_type(EntityType::Topic)
        .entity_id(topic_id)
        .payload(json!({ "kind": "notes", "topic_id": topic_id }))
        .build()
}

fn test_config() -> JobWorkerConfig {
    JobWorkerConfig {
        step_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_secs(60),
        worker_id: "worker-under-test".to_string(),
        ..JobWorkerConfig::default()
    }
}

/// Worker whose notes handler runs the given closure-selected behavior.
fn worker_with_handler<F, Fut>(
    store: Arc<InMemoryJobStore>,
    handler: F,
) -> JobWorker<InMemoryJobStore>
where
    F: Fn(Job, engine_core::kernel::jobs::JobPayload) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<serde_json::Value, EngineError>> + Send + 'static,
{
    worker_with_config(store, test_config(), handler)
}

fn worker_with_config<F, Fut>(
    store: Arc<InMemoryJobStore>,
    config: JobWorkerConfig,
    handler: F,
) -> JobWorker<InMemoryJobStore>
where
    F: Fn(Job, engine_core::kernel::jobs::JobPayload) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<serde_json::Value, EngineError>> + Send + 'static,
{
    let mut registry = HydrationRegistry::new();
    registry.register(JobType::Notes, handler);
    JobWorker::new(store, Arc::new(registry), config)
}

fn succeeding_worker(store: Arc<InMemoryJobStore>) -> JobWorker<InMemoryJobStore> {
    worker_with_handler(store, |_job, _payload| async move {
        Ok(json!({ "chars": 1200 }))
    })
}

fn failing_worker(store: Arc<InMemoryJobStore>) -> JobWorker<InMemoryJobStore> {
    worker_with_handler(store, |_job, _payload| async move {
        Err(EngineError::Generation("provider unavailable".into()))
    })
}

#[tokio::test]
async fn successful_job_completes_with_paired_logs() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    let lock_key = job.lock_key();
    store.insert_job(job);

    let worker = succeeding_worker(Arc::clone(&store));
    let outcome = worker.process_one(job_id).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Completed);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 0);
    assert!(job.last_error.is_none());

    assert_eq!(
        store.events_for(job_id),
        vec![JobEvent::Started, JobEvent::Completed]
    );

    // Lock released after settlement.
    assert!(store.lock_holder(&lock_key).await.unwrap().is_none());

    let completed = store.logs_for(job_id).pop().unwrap();
    assert_eq!(completed.meta["chars"], 1200);
}

#[tokio::test]
async fn transient_failures_retry_until_attempts_exhausted() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let worker = failing_worker(Arc::clone(&store));

    // Attempts 1 and 2 reschedule with backoff.
    for expected_attempts in 1..=2 {
        let outcome = worker.process_one(job_id).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Retried);

        let job = store.job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, expected_attempts);
        assert!(job.next_run_at.unwrap() > chrono::Utc::now());

        store.make_ready(job_id);
    }

    // Attempt 3 is the last: terminal failure.
    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, job.max_attempts);
    assert_eq!(job.last_error.as_deref(), Some("generation failed: provider unavailable"));

    let events = store.events_for(job_id);
    assert_eq!(events.iter().filter(|e| **e == JobEvent::Started).count(), 3);
    assert_eq!(events.iter().filter(|e| **e == JobEvent::Retry).count(), 2);
    assert_eq!(events.iter().filter(|e| **e == JobEvent::Failed).count(), 1);
}

#[tokio::test]
async fn retry_backoff_doubles_between_attempts() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let worker = failing_worker(Arc::clone(&store));

    worker.process_one(job_id).await.unwrap();
    let first_delay = store.job(job_id).unwrap().next_run_at.unwrap() - chrono::Utc::now();
    store.make_ready(job_id);

    worker.process_one(job_id).await.unwrap();
    let second_delay = store.job(job_id).unwrap().next_run_at.unwrap() - chrono::Utc::now();

    // 2^1 then 2^2 seconds, allowing scheduling slack.
    assert!(first_delay.num_seconds() <= 2);
    assert!(second_delay.num_seconds() > first_delay.num_seconds());
}

#[tokio::test]
async fn permanent_errors_fail_without_retry() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let worker = worker_with_handler(Arc::clone(&store), |_job, _payload| async move {
        Err(EngineError::NotFound("topic is gone".into()))
    });

    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn global_pause_requeues_without_consuming_attempt() {
    let store = Arc::new(InMemoryJobStore::new());
    store.set_setting(AI_PAUSED, "true");

    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executions);
    let worker = worker_with_handler(Arc::clone(&store), move |_job, _payload| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    });

    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::PausedRequeued);
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.last_error.as_deref(), Some("AI_PAUSED"));
    assert!(job.next_run_at.unwrap() > chrono::Utc::now());

    assert_eq!(store.events_for(job_id), vec![JobEvent::Paused]);

    // Clearing the flag lets the job run on its next delivery.
    store.clear_setting(AI_PAUSED);
    store.make_ready(job_id);
    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn category_disable_flag_tags_last_error() {
    let store = Arc::new(InMemoryJobStore::new());
    store.set_setting("HYDRATION_DISABLED_NOTES", "true");

    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let worker = succeeding_worker(Arc::clone(&store));
    let outcome = worker.process_one(job_id).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::PausedRequeued);
    let job = store.job(job_id).unwrap();
    assert_eq!(job.last_error.as_deref(), Some("NOTES_DISABLED"));
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn duplicate_delivery_of_terminal_job_is_a_noop() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let worker = succeeding_worker(Arc::clone(&store));
    assert_eq!(
        worker.process_one(job_id).await.unwrap(),
        ProcessOutcome::Completed
    );

    // Redelivery after completion: skipped, no new log rows.
    let logs_before = store.logs_for(job_id).len();
    assert_eq!(
        worker.process_one(job_id).await.unwrap(),
        ProcessOutcome::Skipped(SkipReason::Terminal)
    );
    assert_eq!(store.logs_for(job_id).len(), logs_before);
}

#[tokio::test]
async fn unknown_job_id_is_skipped() {
    let store = Arc::new(InMemoryJobStore::new());
    let worker = succeeding_worker(Arc::clone(&store));

    assert_eq!(
        worker.process_one(Uuid::new_v4()).await.unwrap(),
        ProcessOutcome::Skipped(SkipReason::NotFound)
    );
}

#[tokio::test]
async fn contended_lock_leaves_job_pending() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    let lock_key = job.lock_key();
    store.insert_job(job);

    store.force_lock(&lock_key, "another-worker", 60_000);

    let worker = succeeding_worker(Arc::clone(&store));
    let outcome = worker.process_one(job_id).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::LockContended);
    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(store.events_for(job_id).is_empty());
}

#[tokio::test]
async fn expired_lock_is_reclaimable() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    let lock_key = job.lock_key();
    store.insert_job(job);

    // A lease that already lapsed does not block acquisition.
    store.force_lock(&lock_key, "crashed-worker", -1_000);

    let worker = succeeding_worker(Arc::clone(&store));
    assert_eq!(
        worker.process_one(job_id).await.unwrap(),
        ProcessOutcome::Completed
    );
}

#[tokio::test]
async fn stolen_lock_voids_the_result() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    let lock_key = job.lock_key();
    store.insert_job(job);

    // Mid-execution, another worker takes the key (as it would after our
    // lease lapsed).
    let steal_store = Arc::clone(&store);
    let steal_key = lock_key.clone();
    let worker = worker_with_handler(Arc::clone(&store), move |_job, _payload| {
        let store = Arc::clone(&steal_store);
        let key = steal_key.clone();
        async move {
            store.force_lock(&key, "usurper", 60_000);
            Ok(json!({ "chars": 10 }))
        }
    });

    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::LockStolen);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(store.events_for(job_id).contains(&JobEvent::StaleLock));

    // The usurper's lock is left alone.
    assert_eq!(
        store.lock_holder(&lock_key).await.unwrap().as_deref(),
        Some("usurper")
    );
}

#[tokio::test]
async fn cancel_requested_mid_execution_cancels_at_checkpoint() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let cancel_store = Arc::clone(&store);
    let worker = worker_with_handler(Arc::clone(&store), move |job, _payload| {
        let store = Arc::clone(&cancel_store);
        async move {
            store.set_cancel_requested(job.id);
            Ok(json!({}))
        }
    });

    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Cancelled);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(
        store.events_for(job_id),
        vec![JobEvent::Started, JobEvent::Cancelled]
    );
}

#[tokio::test]
async fn cancel_requested_before_execution_skips_the_handler() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut job = notes_job(Uuid::new_v4());
    job.cancel_requested = true;
    let job_id = job.id;
    store.insert_job(job);

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executions);
    let worker = worker_with_handler(Arc::clone(&store), move |_job, _payload| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    });

    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Cancelled);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(store.job(job_id).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn crashed_worker_jobs_are_recovered_without_consuming_attempts() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut job = notes_job(Uuid::new_v4());
    job.status = JobStatus::Running;
    job.worker_id = Some("crashed-worker".to_string());
    let job_id = job.id;
    store.insert_job(job);
    // No lock row: the crashed worker's lease already expired.

    let recovered = store.recover_stale(10).await.unwrap();
    assert_eq!(recovered, vec![job_id]);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.worker_id.is_none());
    assert_eq!(store.events_for(job_id), vec![JobEvent::Retry]);

    // And the recovered job runs to completion.
    let worker = succeeding_worker(Arc::clone(&store));
    assert_eq!(
        worker.process_one(job_id).await.unwrap(),
        ProcessOutcome::Completed
    );
}

#[tokio::test]
async fn running_job_under_live_lock_is_not_recovered() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut job = notes_job(Uuid::new_v4());
    job.status = JobStatus::Running;
    let lock_key = job.lock_key();
    let job_id = job.id;
    store.insert_job(job);
    store.force_lock(&lock_key, "healthy-worker", 60_000);

    assert!(store.recover_stale(10).await.unwrap().is_empty());
    assert_eq!(store.job(job_id).unwrap().status, JobStatus::Running);

    // And a duplicate delivery skips it rather than double-claiming.
    let worker = succeeding_worker(Arc::clone(&store));
    assert_eq!(
        worker.process_one(job_id).await.unwrap(),
        ProcessOutcome::Skipped(SkipReason::AlreadyRunning)
    );
}

#[tokio::test]
async fn enqueue_is_idempotent_per_live_target() {
    let store = InMemoryJobStore::new();
    let topic_id = Uuid::new_v4();

    let (first_id, created) = store.enqueue_unique(notes_job(topic_id));
    assert!(created);

    // Same live target: no second job.
    let (dup_id, created) = store.enqueue_unique(notes_job(topic_id));
    assert!(!created);
    assert_eq!(dup_id, first_id);

    // A different job type for the same entity is its own job.
    let questions = Job::builder()
        .job_type(JobType::Questions)
        .entity_type(EntityType::Topic)
        .entity_id(topic_id)
        .payload(json!({ "kind": "questions", "topic_id": topic_id }))
        .build();
    let (questions_id, created) = store.enqueue_unique(questions);
    assert!(created);
    assert_ne!(questions_id, first_id);
}

#[tokio::test]
async fn terminal_job_allows_a_fresh_enqueue() {
    let store = Arc::new(InMemoryJobStore::new());
    let topic_id = Uuid::new_v4();

    let (first_id, _) = store.enqueue_unique(notes_job(topic_id));

    let worker = succeeding_worker(Arc::clone(&store));
    worker.process_one(first_id).await.unwrap();

    let (second_id, created) = store.enqueue_unique(notes_job(topic_id));
    assert!(created);
    assert_ne!(second_id, first_id);
}

#[tokio::test]
async fn stale_settlement_leaves_reclaimed_job_to_new_holder() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    let lock_key = job.lock_key();
    store.insert_job(job);

    // While worker A executes, its lease lapses: the recovery sweep
    // requeues the job and worker B re-claims it under a fresh lock.
    let race_store = Arc::clone(&store);
    let race_key = lock_key.clone();
    let worker_a = worker_with_handler(Arc::clone(&store), move |job, _payload| {
        let store = Arc::clone(&race_store);
        let key = race_key.clone();
        async move {
            store.drop_lock(&key);
            store.recover_stale(10).await.unwrap();
            assert!(store.start(job.id, "worker-b").await.unwrap());
            store.force_lock(&key, "worker-b", 60_000);
            Ok(json!({ "chars": 900 }))
        }
    });

    let outcome = worker_a.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::LockStolen);

    // A's settlement must not touch B's active claim.
    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.worker_id.as_deref(), Some("worker-b"));
    let events = store.events_for(job_id);
    assert!(!events.contains(&JobEvent::StaleLock));
    assert!(!events.contains(&JobEvent::Failed));

    // B's run settles normally.
    assert!(store
        .complete(job_id, "worker-b", json!({ "chars": 900 }))
        .await
        .unwrap());
    assert_eq!(store.job(job_id).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn settlement_requires_claim_ownership() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut job = notes_job(Uuid::new_v4());
    job.status = JobStatus::Running;
    job.worker_id = Some("worker-b".to_string());
    let job_id = job.id;
    store.insert_job(job);

    // A stranger's settlements no-op and append nothing.
    assert!(!store
        .fail(job_id, "worker-a", "stale", JobEvent::StaleLock)
        .await
        .unwrap());
    assert!(!store
        .retry(job_id, "worker-a", "boom", chrono::Utc::now())
        .await
        .unwrap());
    assert!(!store.complete(job_id, "worker-a", json!({})).await.unwrap());
    assert!(!store
        .cancel_running(job_id, "worker-a", "op")
        .await
        .unwrap());

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempts, 0);
    assert!(store.events_for(job_id).is_empty());

    // The owner's settlement still lands.
    assert!(store.complete(job_id, "worker-b", json!({})).await.unwrap());
    assert_eq!(store.job(job_id).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn settlement_that_no_longer_applies_reports_superseded() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    // The job reaches a terminal status under the worker's feet while the
    // handler is still running; the completion must not be reported.
    let race_store = Arc::clone(&store);
    let worker = worker_with_handler(Arc::clone(&store), move |job, _payload| {
        let store = Arc::clone(&race_store);
        async move {
            assert!(store
                .cancel_running(job.id, "worker-under-test", "operator")
                .await
                .unwrap());
            Ok(json!({ "chars": 40 }))
        }
    });

    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Superseded);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(
        store.events_for(job_id),
        vec![JobEvent::Started, JobEvent::Cancelled]
    );
}

#[tokio::test]
async fn category_tag_wins_when_both_pause_flags_set() {
    let store = Arc::new(InMemoryJobStore::new());
    store.set_setting(AI_PAUSED, "true");
    store.set_setting("HYDRATION_DISABLED_NOTES", "true");

    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let worker = succeeding_worker(Arc::clone(&store));
    let outcome = worker.process_one(job_id).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::PausedRequeued);
    let job = store.job(job_id).unwrap();
    assert_eq!(job.last_error.as_deref(), Some("NOTES_DISABLED"));
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn step_timeout_counts_as_a_retryable_attempt() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let config = JobWorkerConfig {
        step_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let worker = worker_with_config(Arc::clone(&store), config, |_job, _payload| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!({}))
    });

    let outcome = worker.process_one(job_id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Retried);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.as_deref().unwrap().contains("timed out"));
    assert!(job.next_run_at.unwrap() > chrono::Utc::now());
    assert_eq!(
        store.events_for(job_id),
        vec![JobEvent::Started, JobEvent::Retry]
    );
}

#[tokio::test]
async fn every_transition_has_a_paired_log_row() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = notes_job(Uuid::new_v4());
    let job_id = job.id;
    store.insert_job(job);

    let worker = failing_worker(Arc::clone(&store));
    worker.process_one(job_id).await.unwrap();
    store.make_ready(job_id);
    worker.process_one(job_id).await.unwrap();
    store.make_ready(job_id);
    worker.process_one(job_id).await.unwrap();

    // Replay the log: each row's prev status must chain from the last
    // row's new status, starting from pending.
    let logs = store.logs_for(job_id);
    let mut status = JobStatus::Pending;
    for log in &logs {
        assert_eq!(log.prev_status, status, "audit chain broken at {:?}", log.event);
        status = log.new_status;
    }
    assert_eq!(status, JobStatus::Failed);
    assert_eq!(logs.len(), 6); // 3 started, 2 retry, 1 failed
}
