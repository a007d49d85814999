//! Admin server binary.
//!
//! Serves the operator API and runs the outbox relay sweep. Workers run as
//! a separate binary so the API stays responsive while generation is busy.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engine_core::kernel::jobs::{JobOutbox, JobWorkerConfig};
use engine_core::server::{build_router, AppState};
use engine_core::Config;

const RELAY_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const RELAY_BATCH: i64 = 100;

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
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("running migrations")?;

    let nats = async_nats::connect(&config.nats_url)
        .await
        .context("connecting to NATS")?;

    // Re-publish outbox rows whose enqueue-time publish was missed.
    {
        let db = db_pool.clone();
        let nats = nats.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RELAY_SWEEP_INTERVAL).await;
                match JobOutbox::relay_pending(RELAY_BATCH, &nats, &db).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "relayed outbox rows"),
                    Err(error) => error!(%error, "outbox relay sweep failed"),
                }
            }
        });
    }

    let state = AppState::new(
        db_pool,
        nats,
        config.supervisor_status_path.clone().map(PathBuf::from),
        JobWorkerConfig::default().heartbeat_interval,
    );
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(%addr, "admin server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving")?;

    Ok(())
}
