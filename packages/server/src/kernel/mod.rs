//! Kernel module - pipeline infrastructure and dependencies.

pub mod deps;
pub mod error;
pub mod jobs;
pub mod settings;

pub use deps::EngineDeps;
pub use error::EngineError;
