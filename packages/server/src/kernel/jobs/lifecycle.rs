//! Worker process lifecycle rows.
//!
//! Each worker process registers one row at startup and touches it on a
//! heartbeat interval. Liveness is derived on the read side: a row whose
//! heartbeat is older than a few intervals is presumed dead, so a crashed
//! worker needs no cleanup to be reported correctly.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "worker_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Stopped,
}

/// One registered worker process.
#[derive(FromRow, Debug, Clone, Serialize)]
pub struct WorkerLifecycle {
    pub id: Uuid,
    pub worker_type: String,
    pub status: WorkerStatus,
    pub host: String,
    pub pid: i32,
    pub last_heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const LIFECYCLE_COLUMNS: &str =
    "id, worker_type, status, host, pid, last_heartbeat_at, created_at, updated_at";

impl WorkerLifecycle {
    /// Register this process. `host` falls back to "unknown" when the
    /// environment gives us nothing.
    pub async fn register(worker_type: &str, db: &PgPool) -> Result<Self> {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        let pid = std::process::id() as i32;

        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO worker_lifecycles (
                id, worker_type, status, host, pid, last_heartbeat_at, created_at, updated_at
            )
            VALUES ($1, $2, 'running', $3, $4, NOW(), NOW(), NOW())
            RETURNING {LIFECYCLE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(worker_type)
        .bind(&host)
        .bind(pid)
        .fetch_one(db)
        .await?;

        info!(worker = %row.id, %worker_type, %host, pid, "worker registered");
        Ok(row)
    }

    pub async fn heartbeat(id: Uuid, db: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE worker_lifecycles SET last_heartbeat_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Clean shutdown marker. Crashed workers never reach this; staleness
    /// detection covers them.
    pub async fn deregister(id: Uuid, db: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE worker_lifecycles SET status = 'stopped', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;

        info!(worker = %id, "worker deregistered");
        Ok(())
    }

    pub async fn find_running(db: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {LIFECYCLE_COLUMNS}
            FROM worker_lifecycles
            WHERE status = 'running'
            ORDER BY created_at ASC
            "#,
        ))
        .fetch_all(db)
        .await?;

        Ok(rows)
    }

    /// Read-side liveness: stale once the heartbeat is older than
    /// `factor` intervals.
    pub fn is_stale(&self, now: DateTime<Utc>, interval: Duration, factor: u32) -> bool {
        let allowed = ChronoDuration::from_std(interval * factor)
            .unwrap_or_else(|_| ChronoDuration::seconds(60));
        now - self.last_heartbeat_at > allowed
    }
}

/// Owns a worker's lifecycle row and its heartbeat task.
pub struct WorkerLifecycleTracker {
    db_pool: PgPool,
    row_id: Uuid,
    shutdown: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerLifecycleTracker {
    /// Register the process and start heartbeating on `interval`.
    pub async fn start(worker_type: &str, interval: Duration, db_pool: PgPool) -> Result<Self> {
        let row = WorkerLifecycle::register(worker_type, &db_pool).await?;
        let shutdown = CancellationToken::new();

        let task = {
            let db = db_pool.clone();
            let id = row.id;
            let guard = shutdown.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = guard.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            if let Err(error) = WorkerLifecycle::heartbeat(id, &db).await {
                                warn!(worker = %id, %error, "heartbeat failed");
                            }
                        }
                    }
                }
            })
        };

        Ok(Self {
            db_pool,
            row_id: row.id,
            shutdown,
            task: Some(task),
        })
    }

    pub fn id(&self) -> Uuid {
        self.row_id
    }

    /// Stop heartbeating and mark the row stopped.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        WorkerLifecycle::deregister(self.row_id, &self.db_pool).await
    }
}
