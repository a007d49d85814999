use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub generation_model: String,
    pub supervisor_status_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// The database and queue connections are required: a pipeline process
    /// that cannot reach either must fail at startup, not limp along.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL").context("NATS_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            generation_model: env::var("GENERATION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            supervisor_status_path: env::var("SUPERVISOR_STATUS_PATH").ok(),
        })
    }
}
