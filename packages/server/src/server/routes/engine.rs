//! Queue and infrastructure introspection.

use std::sync::Arc;

use axum::{Extension, Json};

use crate::kernel::jobs::{EngineStatus, QueueCounts};
use crate::server::app::AppState;

use super::ApiError;

/// Per-status job counts.
pub async fn queue_counts(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<QueueCounts>, ApiError> {
    let counts = QueueCounts::fetch(&state.db_pool).await?;
    Ok(Json(counts))
}

/// Round-trip the NATS connection.
pub async fn nats_ping(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .nats
        .flush()
        .await
        .map_err(|e| anyhow::anyhow!("nats flush failed: {}", e))?;

    Ok(Json(serde_json::json!({ "nats": "ok" })))
}

/// Combined queue / worker / supervisor snapshot. Always 200: each source
/// degrades to null independently.
pub async fn orchestrator_status(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<EngineStatus> {
    Json(state.aggregator.get_status().await)
}
