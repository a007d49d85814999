//! EngineDeps - core infrastructure with all dependencies
//!
//! EngineDeps holds what hydration handlers need to do their work
//! (database, content generator) and is injected into the job registry
//! at startup. HTTP-layer state lives separately in the server module.

use std::sync::Arc;

use sqlx::PgPool;

use crate::hydration::generator::ContentGenerator;

/// Shared dependencies for hydration job handlers.
pub struct EngineDeps {
    pub db_pool: PgPool,
    pub generator: Arc<dyn ContentGenerator>,
}

impl EngineDeps {
    /// Creates a new EngineDeps with the given dependencies
    pub fn new(db_pool: PgPool, generator: Arc<dyn ContentGenerator>) -> Self {
        Self { db_pool, generator }
    }
}
