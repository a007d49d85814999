//! Hydration worker binary.
//!
//! Registers a lifecycle row, wires the hydration handlers into the
//! registry, and runs the claim loop until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_client::LlmClient;
use engine_core::hydration::{register_hydration_handlers, LlmContentGenerator};
use engine_core::kernel::deps::EngineDeps;
use engine_core::kernel::jobs::{
    HydrationRegistry, JobWorker, JobWorkerConfig, PostgresJobStore, WorkerLifecycleTracker,
};
use engine_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;

    let nats = async_nats::connect(&config.nats_url)
        .await
        .context("connecting to NATS")?;

    let api_key = config
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY must be set for the worker")?;
    let generator = LlmContentGenerator::new(LlmClient::new(api_key), &config.generation_model);

    let deps = Arc::new(EngineDeps::new(db_pool.clone(), Arc::new(generator)));

    let mut registry = HydrationRegistry::new();
    register_hydration_handlers(&mut registry, deps);

    let worker_config = JobWorkerConfig::default();

    let tracker = WorkerLifecycleTracker::start(
        "hydration",
        worker_config.heartbeat_interval,
        db_pool.clone(),
    )
    .await?;

    // All hydration subjects share the "jobs.hydration." prefix.
    let wake = nats
        .subscribe("jobs.hydration.>")
        .await
        .context("subscribing to job subjects")?;

    let store = Arc::new(PostgresJobStore::new(db_pool));
    let mut worker =
        JobWorker::new(store, Arc::new(registry), worker_config).with_wake(wake);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    worker.run(shutdown).await?;

    if let Err(error) = tracker.shutdown().await {
        warn!(%error, "lifecycle deregistration failed");
    }

    info!("worker exited cleanly");
    Ok(())
}
