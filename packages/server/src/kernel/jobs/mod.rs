//! Job infrastructure for the content-generation pipeline.
//!
//! This module provides the kernel-level pieces of the pipeline:
//! - [`Job`] - Durable job model with guarded status transitions
//! - [`JobExecutionLog`] - Append-only audit trail of every transition
//! - [`JobLock`] - Lease-based mutual exclusion per (job type, entity)
//! - [`PostgresJobQueue`] - Idempotent producer-side enqueue with outbox
//! - [`JobWorker`] - Long-running service that claims and executes jobs
//! - [`WorkerLifecycleTracker`] - Heartbeat registration for worker processes
//! - [`StatusAggregator`] - Read-only operational snapshot
//!
//! # Architecture
//!
//! ```text
//! Producer (hydration::producers)
//!     │
//!     └─► PostgresJobQueue.enqueue()
//!             ├─► Insert job + outbox row (one transaction)
//!             └─► Publish wake-up to NATS (best effort; relay sweep covers misses)
//!
//! JobWorker
//!     │
//!     ├─► Poll DB for ready jobs (JobStore)
//!     ├─► Re-check pause flags (system_settings)
//!     ├─► Acquire JobLock for "{job_type}:{entity_id}"
//!     ├─► pending → running (+ STARTED log)
//!     ├─► HydrationRegistry.execute() → ContentGenerator
//!     └─► completed / retry-with-backoff / failed (+ paired log row)
//! ```
//!
//! Domain-specific handlers live in the hydration module; this module only
//! provides the orchestration machinery.

pub mod execution_log;
mod job;
pub mod lifecycle;
mod lock;
pub mod orchestrator;
mod outbox;
mod payload;
mod queue;
mod registry;
mod store;
pub mod testing;
mod worker;

pub use execution_log::{JobEvent, JobExecutionLog};
pub use job::{EntityType, Job, JobStatus, JobType};
pub use lifecycle::{WorkerLifecycle, WorkerLifecycleTracker, WorkerStatus};
pub use lock::JobLock;
pub use orchestrator::{EngineStatus, StatusAggregator, WorkerSnapshot};
pub use outbox::JobOutbox;
pub use payload::JobPayload;
pub use queue::{CancelOutcome, EnqueueResult, PostgresJobQueue, QueueCounts, QueueMessage};
pub use registry::HydrationRegistry;
pub use store::{JobStore, PostgresJobStore};
pub use worker::{JobWorker, JobWorkerConfig, ProcessOutcome, SkipReason};
