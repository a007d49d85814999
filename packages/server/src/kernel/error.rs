//! Error taxonomy for the content-generation pipeline.
//!
//! Workers use `is_retryable` to decide between the attempt-counted retry
//! path and an immediate terminal failure. Policy failures (the global
//! pause or a per-category disable flag) never reach this classification:
//! they are handled before an attempt starts and carry their own tag,
//! `<CATEGORY>_DISABLED` for a disabled category or `AI_PAUSED` for the
//! global pause.

use std::time::Duration;

use thiserror::Error;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The domain target of a job does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Database failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Hydration is administratively disabled for this category.
    #[error("{tag}")]
    Policy { tag: String },

    /// The AI-call step exceeded its hard timeout.
    #[error("generation step timed out after {0:?}")]
    Timeout(Duration),

    /// The AI-call step failed (network, provider error, unusable output).
    #[error("generation failed: {0}")]
    Generation(String),

    /// The job payload is structurally invalid for its job type.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// Anything else, bubbled up from glue code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether a failed attempt should be retried (up to `max_attempts`).
    ///
    /// Validation-class errors are permanent: re-running the same payload
    /// cannot succeed, so they go terminal on the first attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::NotFound(_) | EngineError::Payload(_) => false,
            EngineError::Policy { .. } => false,
            EngineError::Storage(_)
            | EngineError::Timeout(_)
            | EngineError::Generation(_)
            | EngineError::Other(_) => true,
        }
    }

    /// Convenience constructor for policy failures.
    pub fn policy(tag: impl Into<String>) -> Self {
        EngineError::Policy { tag: tag.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!EngineError::NotFound("topic".into()).is_retryable());
        assert!(!EngineError::Payload("kind mismatch".into()).is_retryable());
        assert!(!EngineError::policy("NOTES_DISABLED").is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(EngineError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(EngineError::Generation("rate limited".into()).is_retryable());
    }
}
