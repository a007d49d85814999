//! Read-only operational status aggregation.
//!
//! Pulls queue counts, worker liveness, and (optionally) a process
//! supervisor's status file into one snapshot for the admin endpoint. Each
//! source degrades independently: a failure is logged and reported as
//! `null`, never as an endpoint error.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

use super::lifecycle::WorkerLifecycle;
use super::queue::QueueCounts;

/// How many missed heartbeat intervals before a worker counts as stale.
const STALE_FACTOR: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    #[serde(flatten)]
    pub worker: WorkerLifecycle,
    pub stale: bool,
}

/// Combined engine status.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Per-status job counts, or null if the query failed.
    pub queue: Option<QueueCounts>,
    /// Registered workers with derived staleness, or null on failure.
    pub workers: Option<Vec<WorkerSnapshot>>,
    /// Raw supervisor status, or null when unconfigured or unreadable.
    pub supervisor: Option<serde_json::Value>,
}

/// Builds [`EngineStatus`] snapshots. Holds no state beyond its sources.
#[derive(Clone)]
pub struct StatusAggregator {
    db_pool: PgPool,
    supervisor_path: Option<PathBuf>,
    heartbeat_interval: Duration,
}

impl StatusAggregator {
    pub fn new(
        db_pool: PgPool,
        supervisor_path: Option<PathBuf>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            db_pool,
            supervisor_path,
            heartbeat_interval,
        }
    }

    pub async fn get_status(&self) -> EngineStatus {
        let queue = match QueueCounts::fetch(&self.db_pool).await {
            Ok(counts) => Some(counts),
            Err(error) => {
                warn!(%error, "queue counts unavailable");
                None
            }
        };

        let workers = match WorkerLifecycle::find_running(&self.db_pool).await {
            Ok(rows) => {
                let now = Utc::now();
                Some(
                    rows.into_iter()
                        .map(|worker| {
                            let stale = worker.is_stale(now, self.heartbeat_interval, STALE_FACTOR);
                            WorkerSnapshot { worker, stale }
                        })
                        .collect(),
                )
            }
            Err(error) => {
                warn!(%error, "worker list unavailable");
                None
            }
        };

        let supervisor = self.read_supervisor().await;

        EngineStatus {
            queue,
            workers,
            supervisor,
        }
    }

    async fn read_supervisor(&self) -> Option<serde_json::Value> {
        let path = self.supervisor_path.as_ref()?;

        match tokio::fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(path = %path.display(), %error, "supervisor status not valid JSON");
                    None
                }
            },
            Err(error) => {
                warn!(path = %path.display(), %error, "supervisor status unreadable");
                None
            }
        }
    }
}
