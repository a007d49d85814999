//! System settings key-value store.
//!
//! A generic key/string-value table the pipeline reads for operational
//! flags. The worker re-reads the pause flags once per processing attempt
//! so an operator toggle takes effect within one polling interval.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// Global kill-switch: when truthy, workers skip every hydration category
/// before starting an attempt. Individual categories can also be disabled
/// on their own via `HYDRATION_DISABLED_<CATEGORY>` flags.
pub const AI_PAUSED: &str = "AI_PAUSED";

/// A single system setting row.
#[derive(FromRow, Debug, Clone)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl SystemSetting {
    /// Read a setting value, if present.
    pub async fn get(key: &str, db: &PgPool) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM system_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(db)
        .await?;

        Ok(value)
    }

    /// Upsert a setting value.
    pub async fn set(key: &str, value: &str, db: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Set the global pause flag.
    pub async fn pause_ai(db: &PgPool) -> Result<()> {
        Self::set(AI_PAUSED, "true", db).await
    }

    /// Clear the global pause flag.
    pub async fn resume_ai(db: &PgPool) -> Result<()> {
        Self::set(AI_PAUSED, "false", db).await
    }
}

/// Whether a stored setting value counts as enabled.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("true"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" 1 "));
        assert!(is_truthy("yes"));
    }

    #[test]
    fn falsy_values() {
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("paused"));
    }
}
