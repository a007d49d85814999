//! Lease-based job lock.
//!
//! Mutual exclusion keyed by a logical resource name
//! (`"{job_type}:{entity_id}"`). Acquisition is a single atomic upsert:
//! it succeeds only when no live row exists, the existing lease has
//! expired, or the caller already holds the key (which doubles as
//! renewal). An expired lease is reclaimable by any worker; the
//! dispossessed holder detects the steal at completion time via
//! [`JobLock::holder_of`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// A lock row. `expires_at` in the past means the lease has lapsed and the
/// key is reclaimable.
#[derive(FromRow, Debug, Clone)]
pub struct JobLock {
    pub key: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JobLock {
    /// Try to acquire (or re-acquire) the lock. Returns false on contention.
    pub async fn acquire(key: &str, holder: &str, lease_ms: i64, db: &PgPool) -> Result<bool> {
        let acquired = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO job_locks (key, holder, acquired_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + ($3 || ' milliseconds')::INTERVAL)
            ON CONFLICT (key) DO UPDATE
            SET holder = EXCLUDED.holder,
                acquired_at = NOW(),
                expires_at = EXCLUDED.expires_at
            WHERE job_locks.expires_at < NOW() OR job_locks.holder = EXCLUDED.holder
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(lease_ms.to_string())
        .fetch_optional(db)
        .await?;

        Ok(acquired.is_some())
    }

    /// Extend the lease. Returns false if the caller no longer holds the key.
    pub async fn renew(key: &str, holder: &str, lease_ms: i64, db: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL
            WHERE key = $1 AND holder = $2
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(lease_ms.to_string())
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release the lock. A no-op when the row is gone or held by someone
    /// else; double-release must not fail.
    pub async fn release(key: &str, holder: &str, db: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM job_locks WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(db)
            .await?;

        Ok(())
    }

    /// The current live holder, if any.
    pub async fn holder_of(key: &str, db: &PgPool) -> Result<Option<String>> {
        let holder = sqlx::query_scalar::<_, String>(
            "SELECT holder FROM job_locks WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(db)
        .await?;

        Ok(holder)
    }

    /// Whether any live lease exists for the key.
    pub async fn is_held(key: &str, db: &PgPool) -> Result<bool> {
        Ok(Self::holder_of(key, db).await?.is_some())
    }

    /// Read-side lease check for a fetched row.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_liveness_is_expiry_comparison() {
        let now = Utc::now();
        let live = JobLock {
            key: "notes:x".into(),
            holder: "worker-1".into(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(30),
        };
        let stale = JobLock {
            expires_at: now - chrono::Duration::seconds(1),
            ..live.clone()
        };

        assert!(live.is_live(now));
        assert!(!stale.is_live(now));
    }
}
