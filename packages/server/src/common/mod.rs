//! Common building blocks shared across the engine.

pub mod record;

pub use record::Record;
