//! Job worker: claims ready jobs and drives them through the state machine.
//!
//! The durable claim loop polls Postgres; NATS wake-ups only shorten the
//! wait between polls, so a dropped message costs latency, never work.
//! Delivery is at-least-once and the processing protocol is written to
//! survive duplicates: every claim is a guarded conditional update, and a
//! job that is already terminal, already running under a live lock, or
//! locked by another worker is simply skipped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::kernel::error::EngineError;
use crate::kernel::settings::{is_truthy, AI_PAUSED};

use super::execution_log::JobEvent;
use super::job::{Job, JobStatus};
use super::registry::HydrationRegistry;
use super::store::JobStore;

const BACKOFF_CAP_SECS: u64 = 3600;

/// Exponential backoff for attempt `attempt` (1-based), capped at one hour.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt)
        .unwrap_or(BACKOFF_CAP_SECS)
        .min(BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// How many ready jobs to pull per poll.
    pub batch_size: i64,
    /// Idle wait between polls when no wake-up arrives.
    pub poll_interval: Duration,
    /// How far to push out a job skipped by a pause flag.
    pub pause_backoff: Duration,
    /// Hard ceiling on a single generation step.
    pub step_timeout: Duration,
    /// Lock lease length in milliseconds.
    pub lease_ms: i64,
    /// How often the renew task extends the lease while executing.
    pub heartbeat_interval: Duration,
    /// Stable identity of this worker process.
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_interval: Duration::from_secs(5),
            pause_backoff: Duration::from_secs(60),
            step_timeout: Duration::from_secs(120),
            lease_ms: 60_000,
            heartbeat_interval: Duration::from_secs(20),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

/// Why a delivered job was skipped without an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    /// Already completed, failed, or cancelled.
    Terminal,
    /// Running under a live lock on another worker.
    AlreadyRunning,
    /// Scheduled for later; the poll loop will pick it up when due.
    NotReady,
    /// Another worker won the pending → running race.
    ClaimLost,
}

/// Outcome of processing one delivered job id.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    /// A pause flag matched; the job was pushed out without an attempt.
    PausedRequeued,
    /// The lock is held elsewhere; the job stays pending.
    LockContended,
    Completed,
    /// The attempt failed and was rescheduled with backoff.
    Retried,
    /// Terminal failure (attempts exhausted or permanent error).
    Failed,
    Cancelled,
    /// Our lease lapsed mid-run and another worker took the lock.
    LockStolen,
    /// The claim moved while we were settling; our result did not apply.
    Superseded,
}

/// Long-running worker service.
pub struct JobWorker<S: JobStore> {
    store: Arc<S>,
    registry: Arc<HydrationRegistry>,
    config: JobWorkerConfig,
    wake: Option<async_nats::Subscriber>,
}

impl<S: JobStore> JobWorker<S> {
    pub fn new(store: Arc<S>, registry: Arc<HydrationRegistry>, config: JobWorkerConfig) -> Self {
        Self {
            store,
            registry,
            config,
            wake: None,
        }
    }

    /// Attach a NATS subscription whose messages cut the poll wait short.
    pub fn with_wake(mut self, subscriber: async_nats::Subscriber) -> Self {
        self.wake = Some(subscriber);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Poll-and-process until `shutdown` fires.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!(worker_id = %self.config.worker_id, "job worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.store.recover_stale(self.config.batch_size).await {
                Ok(recovered) if !recovered.is_empty() => {
                    info!(count = recovered.len(), "requeued jobs with lapsed leases");
                }
                Ok(_) => {}
                Err(error) => warn!(%error, "stale-job recovery failed"),
            }

            let ready = match self.store.next_ready(self.config.batch_size).await {
                Ok(jobs) => jobs,
                Err(error) => {
                    warn!(%error, "poll for ready jobs failed");
                    Vec::new()
                }
            };

            for job in ready {
                if shutdown.is_cancelled() {
                    break;
                }

                match self.process_one(job.id).await {
                    Ok(outcome) => debug!(job_id = %job.id, ?outcome, "processed job"),
                    Err(error) => error!(job_id = %job.id, %error, "job processing errored"),
                }
            }

            let mut wake_closed = false;
            if let Some(wake) = self.wake.as_mut() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    message = wake.next() => {
                        match message {
                            Some(_) => debug!("woken by queue message"),
                            None => {
                                warn!("wake subscription closed; falling back to polling");
                                wake_closed = true;
                            }
                        }
                    }
                }
            } else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
            if wake_closed {
                self.wake = None;
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    /// Run one delivered job id through the full claim/execute/settle
    /// protocol. Safe to call with duplicates and stale deliveries.
    pub async fn process_one(&self, job_id: Uuid) -> Result<ProcessOutcome> {
        let Some(job) = self.store.fetch(job_id).await? else {
            return Ok(ProcessOutcome::Skipped(SkipReason::NotFound));
        };

        if job.status.is_terminal() {
            return Ok(ProcessOutcome::Skipped(SkipReason::Terminal));
        }

        if job.status == JobStatus::Running {
            // A live lock means another worker is on it; a lapsed lock is
            // the recovery sweep's problem.
            return Ok(ProcessOutcome::Skipped(SkipReason::AlreadyRunning));
        }

        if !job.is_ready() {
            return Ok(ProcessOutcome::Skipped(SkipReason::NotReady));
        }

        if let Some(tag) = self.pause_tag(&job).await? {
            let next_run = Utc::now()
                + chrono::Duration::from_std(self.config.pause_backoff)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            if self.store.pause_requeue(job.id, &tag, next_run).await? {
                info!(job_id = %job.id, %tag, "job paused by policy flag");
                return Ok(ProcessOutcome::PausedRequeued);
            }
            return Ok(ProcessOutcome::Skipped(SkipReason::ClaimLost));
        }

        let lock_key = job.lock_key();
        let worker_id = self.config.worker_id.clone();

        if !self
            .store
            .acquire_lock(&lock_key, &worker_id, self.config.lease_ms)
            .await?
        {
            debug!(job_id = %job.id, %lock_key, "lock contended");
            return Ok(ProcessOutcome::LockContended);
        }

        if !self.store.start(job.id, &worker_id).await? {
            // Someone else moved the job between our read and the claim.
            self.store.release_lock(&lock_key, &worker_id).await?;
            return Ok(ProcessOutcome::Skipped(SkipReason::ClaimLost));
        }

        if job.cancel_requested {
            let outcome = if self
                .store
                .cancel_running(job.id, &worker_id, "cancel_requested")
                .await?
            {
                ProcessOutcome::Cancelled
            } else {
                ProcessOutcome::Superseded
            };
            self.store.release_lock(&lock_key, &worker_id).await?;
            return Ok(outcome);
        }

        let outcome = self.execute_claimed(&job, &lock_key, &worker_id).await?;

        // A stolen lock belongs to its new holder; everything else releases.
        if outcome != ProcessOutcome::LockStolen {
            self.store.release_lock(&lock_key, &worker_id).await?;
        }

        Ok(outcome)
    }

    async fn execute_claimed(
        &self,
        job: &Job,
        lock_key: &str,
        worker_id: &str,
    ) -> Result<ProcessOutcome> {
        let renew_guard = CancellationToken::new();
        let renew_task = {
            let store = Arc::clone(&self.store);
            let guard = renew_guard.clone();
            let key = lock_key.to_string();
            let holder = worker_id.to_string();
            let lease_ms = self.config.lease_ms;
            let interval = self.config.heartbeat_interval;

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = guard.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            match store.renew_lock(&key, &holder, lease_ms).await {
                                Ok(true) => {}
                                Ok(false) => {
                                    warn!(%key, "lock renew refused; lease lost");
                                    break;
                                }
                                Err(error) => warn!(%key, %error, "lock renew failed"),
                            }
                        }
                    }
                }
            })
        };

        let result = tokio::time::timeout(
            self.config.step_timeout,
            self.registry.execute(job.clone()),
        )
        .await;

        renew_guard.cancel();
        let _ = renew_task.await;

        let result = match result {
            Ok(inner) => inner,
            Err(_) => Err(EngineError::Timeout(self.config.step_timeout)),
        };

        // Cooperative cancellation checkpoint: the flag may have been set
        // while we were executing.
        if let Some(current) = self.store.fetch(job.id).await? {
            if current.cancel_requested && current.status == JobStatus::Running {
                if !self
                    .store
                    .cancel_running(job.id, worker_id, "cancel_requested")
                    .await?
                {
                    return Ok(ProcessOutcome::Superseded);
                }
                info!(job_id = %job.id, "job cancelled at checkpoint");
                return Ok(ProcessOutcome::Cancelled);
            }
        }

        // Only the current lock holder may settle the job. If our lease
        // lapsed and another worker took the key, our result is void. The
        // fail below is claim-guarded: it only lands while the job still
        // carries our claim, so a job the recovery sweep already requeued
        // (or that a new worker already re-claimed) is left to its new
        // holder.
        match self.store.lock_holder(lock_key).await? {
            Some(holder) if holder == worker_id => {}
            other => {
                warn!(job_id = %job.id, ?other, "lock stolen during execution");
                let settled = self
                    .store
                    .fail(
                        job.id,
                        worker_id,
                        "lock lease expired during execution",
                        JobEvent::StaleLock,
                    )
                    .await?;
                if !settled {
                    debug!(job_id = %job.id, "stale claim already superseded");
                }
                return Ok(ProcessOutcome::LockStolen);
            }
        }

        match result {
            Ok(summary) => {
                if !self.store.complete(job.id, worker_id, summary).await? {
                    return Ok(ProcessOutcome::Superseded);
                }
                info!(job_id = %job.id, job_type = %job.job_type, "job completed");
                Ok(ProcessOutcome::Completed)
            }
            Err(error) => self.settle_failure(job, worker_id, error).await,
        }
    }

    async fn settle_failure(
        &self,
        job: &Job,
        worker_id: &str,
        error: EngineError,
    ) -> Result<ProcessOutcome> {
        // The attempt that just failed.
        let attempt = job.attempts + 1;
        let message = error.to_string();

        if error.is_retryable() && attempt < job.max_attempts {
            let delay = retry_delay(attempt as u32);
            let next_run = Utc::now()
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(BACKOFF_CAP_SECS as i64));
            if !self.store.retry(job.id, worker_id, &message, next_run).await? {
                return Ok(ProcessOutcome::Superseded);
            }
            warn!(job_id = %job.id, %message, attempt, delay_secs = delay.as_secs(), "job attempt failed; retrying");
            Ok(ProcessOutcome::Retried)
        } else {
            if !self
                .store
                .fail(job.id, worker_id, &message, JobEvent::Failed)
                .await?
            {
                return Ok(ProcessOutcome::Superseded);
            }
            error!(job_id = %job.id, %message, attempt, "job failed terminally");
            Ok(ProcessOutcome::Failed)
        }
    }

    /// The pause tag that applies to this job, if any. A category disable
    /// flag always surfaces its own tag, including when the global pause is
    /// also set; the bare `AI_PAUSED` tag is for jobs paused only globally.
    async fn pause_tag(&self, job: &Job) -> Result<Option<String>> {
        if let Some(value) = self.store.setting(&job.job_type.disable_flag()).await? {
            if is_truthy(&value) {
                return Ok(Some(job.job_type.disabled_tag()));
            }
        }

        if let Some(value) = self.store.setting(AI_PAUSED).await? {
            if is_truthy(&value) {
                return Ok(Some(AI_PAUSED.to_string()));
            }
        }

        Ok(None)
    }
}
