//! Admin HTTP surface for operating the pipeline.

pub mod app;
pub mod routes;

pub use app::{build_router, AppState};
