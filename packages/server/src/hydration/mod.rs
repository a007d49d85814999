//! Content hydration: the domain side of the pipeline.
//!
//! The kernel provides the queue, lock, and worker machinery; this module
//! provides what runs on top of it. `catalog` holds the course structure
//! (subjects, chapters, topics) and the generated content columns,
//! `generator` abstracts the AI call, `producers` turn API requests into
//! idempotent enqueues, and `handlers` register the per-stage execution
//! logic with the worker's registry.

pub mod catalog;
pub mod generator;
pub mod handlers;
pub mod producers;

pub use generator::{ContentGenerator, LlmContentGenerator};
pub use handlers::register_hydration_handlers;
pub use producers::HydrationProducer;
