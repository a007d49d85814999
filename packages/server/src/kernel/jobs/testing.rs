//! In-memory test double for the job store.
//!
//! Implements the same guarded-transition contract as the Postgres store,
//! including paired audit log rows and lease-based locks, so integration
//! tests can drive the full worker protocol without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use super::execution_log::{JobEvent, JobExecutionLog};
use super::job::{Job, JobStatus};
use super::store::JobStore;

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    logs: Vec<JobExecutionLog>,
    locks: HashMap<String, LockEntry>,
    settings: HashMap<String, String>,
}

impl Inner {
    fn append_log(
        &mut self,
        job_id: Uuid,
        event: JobEvent,
        prev_status: JobStatus,
        new_status: JobStatus,
        meta: serde_json::Value,
    ) {
        self.logs.push(JobExecutionLog {
            id: Uuid::new_v4(),
            job_id,
            event,
            prev_status,
            new_status,
            meta,
            created_at: Utc::now(),
        });
    }
}

/// In-memory [`JobStore`] for tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job row directly, bypassing producer idempotency.
    pub fn insert_job(&self, job: Job) {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(job.id, job);
    }

    /// Producer-style idempotent insert: refuses when a non-terminal job
    /// already exists for the same (job_type, entity_id). Returns the id of
    /// whichever job now covers the target and whether it was created.
    pub fn enqueue_unique(&self, job: Job) -> (Uuid, bool) {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner
            .jobs
            .values()
            .find(|j| {
                j.job_type == job.job_type
                    && j.entity_id == job.entity_id
                    && !j.status.is_terminal()
            })
            .map(|j| j.id);

        match existing {
            Some(id) => (id, false),
            None => {
                let id = job.id;
                inner.jobs.insert(id, job);
                (id, true)
            }
        }
    }

    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(&job_id).cloned()
    }

    pub fn logs_for(&self, job_id: Uuid) -> Vec<JobExecutionLog> {
        self.inner
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|log| log.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn events_for(&self, job_id: Uuid) -> Vec<JobEvent> {
        self.logs_for(job_id).iter().map(|log| log.event).collect()
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .settings
            .insert(key.to_string(), value.to_string());
    }

    pub fn clear_setting(&self, key: &str) {
        self.inner.lock().unwrap().settings.remove(key);
    }

    /// Pull a scheduled job's next run into the past so it polls as ready.
    pub fn make_ready(&self, job_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.next_run_at = Some(Utc::now() - ChronoDuration::seconds(1));
        }
    }

    /// Flip the cooperative cancellation flag.
    pub fn set_cancel_requested(&self, job_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.cancel_requested = true;
        }
    }

    /// Plant a lock held by someone else, for contention and steal tests.
    pub fn force_lock(&self, key: &str, holder: &str, lease_ms: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.locks.insert(
            key.to_string(),
            LockEntry {
                holder: holder.to_string(),
                expires_at: Utc::now() + ChronoDuration::milliseconds(lease_ms),
            },
        );
    }

    pub fn drop_lock(&self, key: &str) {
        self.inner.lock().unwrap().locks.remove(key);
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn fetch(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.job(job_id))
    }

    async fn next_ready(&self, limit: i64) -> Result<Vec<Job>> {
        let inner = self.inner.lock().unwrap();
        let mut ready: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.is_ready())
            .cloned()
            .collect();
        ready.sort_by_key(|job| job.next_run_at.unwrap_or(job.created_at));
        ready.truncate(limit as usize);
        Ok(ready)
    }

    async fn recover_stale(&self, limit: i64) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        let orphaned: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Running
                    && !inner
                        .locks
                        .get(&job.lock_key())
                        .map(|lock| lock.expires_at > now)
                        .unwrap_or(false)
            })
            .map(|job| job.id)
            .take(limit as usize)
            .collect();

        for id in &orphaned {
            let worker_id = {
                let job = inner.jobs.get_mut(id).unwrap();
                job.status = JobStatus::Pending;
                let worker_id = job.worker_id.take();
                job.next_run_at = Some(now);
                job.updated_at = now;
                worker_id
            };
            inner.append_log(
                *id,
                JobEvent::Retry,
                JobStatus::Running,
                JobStatus::Pending,
                serde_json::json!({ "reason": "lease_expired", "worker_id": worker_id }),
            );
        }

        Ok(orphaned)
    }

    async fn start(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        let attempts = match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Running;
                job.worker_id = Some(worker_id.to_string());
                job.updated_at = Utc::now();
                job.attempts
            }
            _ => return Ok(false),
        };

        inner.append_log(
            job_id,
            JobEvent::Started,
            JobStatus::Pending,
            JobStatus::Running,
            serde_json::json!({ "worker_id": worker_id, "attempt": attempts + 1 }),
        );
        Ok(true)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        meta: serde_json::Value,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        match inner.jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.worker_id.as_deref() == Some(worker_id) =>
            {
                job.status = JobStatus::Completed;
                job.last_error = None;
                job.updated_at = Utc::now();
            }
            _ => return Ok(false),
        }

        inner.append_log(
            job_id,
            JobEvent::Completed,
            JobStatus::Running,
            JobStatus::Completed,
            meta,
        );
        Ok(true)
    }

    async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        let attempts = match inner.jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.worker_id.as_deref() == Some(worker_id) =>
            {
                job.status = JobStatus::Pending;
                job.attempts += 1;
                job.last_error = Some(error.to_string());
                job.next_run_at = Some(next_run_at);
                job.worker_id = None;
                job.updated_at = Utc::now();
                job.attempts
            }
            _ => return Ok(false),
        };

        inner.append_log(
            job_id,
            JobEvent::Retry,
            JobStatus::Running,
            JobStatus::Pending,
            serde_json::json!({ "error": error, "attempts": attempts, "next_run_at": next_run_at }),
        );
        Ok(true)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        event: JobEvent,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        let attempts = match inner.jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.worker_id.as_deref() == Some(worker_id) =>
            {
                job.status = JobStatus::Failed;
                job.attempts += 1;
                job.last_error = Some(error.to_string());
                job.updated_at = Utc::now();
                job.attempts
            }
            _ => return Ok(false),
        };

        inner.append_log(
            job_id,
            event,
            JobStatus::Running,
            JobStatus::Failed,
            serde_json::json!({ "error": error, "attempts": attempts }),
        );
        Ok(true)
    }

    async fn cancel_running(&self, job_id: Uuid, worker_id: &str, reason: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        match inner.jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.worker_id.as_deref() == Some(worker_id) =>
            {
                job.status = JobStatus::Cancelled;
                job.worker_id = None;
                job.updated_at = Utc::now();
            }
            _ => return Ok(false),
        }

        inner.append_log(
            job_id,
            JobEvent::Cancelled,
            JobStatus::Running,
            JobStatus::Cancelled,
            serde_json::json!({ "reason": reason }),
        );
        Ok(true)
    }

    async fn pause_requeue(
        &self,
        job_id: Uuid,
        tag: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.last_error = Some(tag.to_string());
                job.next_run_at = Some(next_run_at);
                job.updated_at = Utc::now();
            }
            _ => return Ok(false),
        }

        inner.append_log(
            job_id,
            JobEvent::Paused,
            JobStatus::Pending,
            JobStatus::Pending,
            serde_json::json!({ "tag": tag, "next_run_at": next_run_at }),
        );
        Ok(true)
    }

    async fn acquire_lock(&self, key: &str, holder: &str, lease_ms: i64) -> Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        let reclaimable = match inner.locks.get(key) {
            None => true,
            Some(lock) => lock.expires_at < now || lock.holder == holder,
        };

        if !reclaimable {
            return Ok(false);
        }

        inner.locks.insert(
            key.to_string(),
            LockEntry {
                holder: holder.to_string(),
                expires_at: now + ChronoDuration::milliseconds(lease_ms),
            },
        );
        Ok(true)
    }

    async fn renew_lock(&self, key: &str, holder: &str, lease_ms: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        match inner.locks.get_mut(key) {
            Some(lock) if lock.holder == holder => {
                lock.expires_at = Utc::now() + ChronoDuration::milliseconds(lease_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .locks
            .get(key)
            .map(|lock| lock.holder == holder)
            .unwrap_or(false)
        {
            inner.locks.remove(key);
        }
        Ok(())
    }

    async fn lock_holder(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .locks
            .get(key)
            .filter(|lock| lock.expires_at > now)
            .map(|lock| lock.holder.clone()))
    }

    async fn setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().settings.get(key).cloned())
    }
}
