//! Job submission, inspection, and cancellation.

use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;

use crate::common::Record;
use crate::kernel::error::EngineError;
use crate::kernel::jobs::{CancelOutcome, Job, JobExecutionLog, JobPayload};
use crate::server::app::AppState;

use super::ApiError;

/// Submit a hydration job. Returns 201 for a new job, 200 with the
/// existing id when a live job already covers the target.
pub async fn submit(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<JobPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let result = state.producer.request(payload).await?;

    let status = if result.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(serde_json::json!({
            "jobId": result.job_id(),
            "created": result.is_created(),
        })),
    ))
}

pub async fn show(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = Job::find_by_id(id, &state.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("job {}", id)))?;

    Ok(Json(job))
}

/// Full audit timeline for a job, oldest first.
pub async fn timeline(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<JobExecutionLog>>, ApiError> {
    if Job::find_by_id(id, &state.db_pool).await?.is_none() {
        return Err(EngineError::NotFound(format!("job {}", id)).into());
    }

    let logs = JobExecutionLog::timeline(id, &state.db_pool).await?;
    Ok(Json(logs))
}

pub async fn cancel(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let outcome = state.queue.cancel(id).await?;

    let (status, body) = match outcome {
        CancelOutcome::Cancelled => (
            StatusCode::OK,
            serde_json::json!({ "status": "cancelled" }),
        ),
        CancelOutcome::CancellationRequested => (
            StatusCode::ACCEPTED,
            serde_json::json!({ "status": "cancellation_requested" }),
        ),
        CancelOutcome::AlreadyTerminal(terminal) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "status": terminal.as_str() }),
        ),
        CancelOutcome::NotFound => {
            return Err(EngineError::NotFound(format!("job {}", id)).into());
        }
    };

    Ok((status, Json(body)))
}
