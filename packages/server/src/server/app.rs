//! Router assembly and shared HTTP state.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Extension, Router};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::hydration::HydrationProducer;
use crate::kernel::jobs::{PostgresJobQueue, StatusAggregator};

use super::routes;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub nats: async_nats::Client,
    pub queue: PostgresJobQueue,
    pub producer: HydrationProducer,
    pub aggregator: StatusAggregator,
}

impl AppState {
    pub fn new(
        db_pool: PgPool,
        nats: async_nats::Client,
        supervisor_status_path: Option<std::path::PathBuf>,
        heartbeat_interval: Duration,
    ) -> Self {
        let queue = PostgresJobQueue::new(db_pool.clone(), nats.clone());
        let producer = HydrationProducer::new(db_pool.clone(), queue.clone());
        let aggregator =
            StatusAggregator::new(db_pool.clone(), supervisor_status_path, heartbeat_interval);

        Self {
            db_pool,
            nats,
            queue,
            producer,
            aggregator,
        }
    }
}

/// Build the admin router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/topics/pause", post(routes::topics::pause))
        .route("/topics/resume", post(routes::topics::resume))
        .route("/content-engine/queue", get(routes::engine::queue_counts))
        .route("/content-engine/nats", get(routes::engine::nats_ping))
        .route("/orchestrator/status", get(routes::engine::orchestrator_status))
        .route("/jobs", post(routes::jobs::submit))
        .route("/jobs/:id", get(routes::jobs::show))
        .route("/jobs/:id/timeline", get(routes::jobs::timeline))
        .route("/jobs/:id/cancel", post(routes::jobs::cancel))
        .layer(Extension(Arc::new(state)))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
}
