//! Operator pause controls.
//!
//! Toggling `AI_PAUSED` stops workers from starting new generation
//! attempts; jobs already executing finish their current step. Running
//! workers re-read the flag once per attempt, so the toggle takes effect
//! within one polling interval without a restart.

use std::sync::Arc;

use axum::{Extension, Json};
use tracing::info;

use crate::kernel::settings::SystemSetting;
use crate::server::app::AppState;

use super::ApiError;

pub async fn pause(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    SystemSetting::pause_ai(&state.db_pool).await?;
    info!("AI generation paused");
    Ok(Json(serde_json::json!({ "paused": true })))
}

pub async fn resume(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    SystemSetting::resume_ai(&state.db_pool).await?;
    info!("AI generation resumed");
    Ok(Json(serde_json::json!({ "paused": false })))
}
