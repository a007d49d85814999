// Course Content Engine - pipeline core
//
// This crate provides the durable content-generation job pipeline for the
// tutoring platform: producers, the Postgres-backed job store and lock,
// the worker state machine, worker lifecycle tracking, and the admin
// HTTP surface that operates the pipeline.

pub mod common;
pub mod config;
pub mod hydration;
pub mod kernel;
pub mod server;

pub use config::*;
