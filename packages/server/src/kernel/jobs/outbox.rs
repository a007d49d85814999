//! Transactional outbox for queue notifications.
//!
//! Enqueue writes the job row and an outbox row in one transaction, then
//! publishes to NATS best-effort. A publish that fails (or a process that
//! dies in between) leaves the outbox row unrelayed; the periodic relay
//! sweep re-publishes those, so every committed job eventually reaches the
//! queue at least once.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

/// A pending (or already relayed) queue notification.
#[derive(FromRow, Debug, Clone)]
pub struct JobOutbox {
    pub id: Uuid,
    pub job_id: Uuid,
    pub subject: String,
    pub payload: serde_json::Value,
    pub relayed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobOutbox {
    /// Insert an outbox row; callers run this inside the enqueue transaction.
    pub async fn insert_with<'e, E>(
        job_id: Uuid,
        subject: &str,
        payload: serde_json::Value,
        executor: E,
    ) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO job_outbox (id, job_id, subject, payload, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, job_id, subject, payload, relayed_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(subject)
        .bind(payload)
        .fetch_one(executor)
        .await?;

        Ok(row)
    }

    pub async fn mark_relayed(id: Uuid, db: &PgPool) -> Result<()> {
        sqlx::query("UPDATE job_outbox SET relayed_at = NOW() WHERE id = $1 AND relayed_at IS NULL")
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    pub async fn find_unrelayed(limit: i64, db: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, job_id, subject, payload, relayed_at, created_at
            FROM job_outbox
            WHERE relayed_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(rows)
    }

    /// One sweep of the relay: publish every unrelayed row and mark it.
    ///
    /// Duplicate publishes are fine; consumers are idempotent per job id.
    /// Returns the number of rows relayed.
    pub async fn relay_pending(
        limit: i64,
        nats: &async_nats::Client,
        db: &PgPool,
    ) -> Result<usize> {
        let rows = Self::find_unrelayed(limit, db).await?;
        let mut relayed = 0;

        for row in rows {
            let bytes = match serde_json::to_vec(&row.payload) {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(outbox_id = %row.id, %error, "skipping unserializable outbox row");
                    continue;
                }
            };

            match nats.publish(row.subject.clone(), bytes.into()).await {
                Ok(()) => {
                    Self::mark_relayed(row.id, db).await?;
                    debug!(outbox_id = %row.id, job_id = %row.job_id, subject = %row.subject, "relayed outbox row");
                    relayed += 1;
                }
                Err(error) => {
                    // Leave the row for the next sweep.
                    warn!(outbox_id = %row.id, %error, "outbox publish failed");
                }
            }
        }

        Ok(relayed)
    }
}
