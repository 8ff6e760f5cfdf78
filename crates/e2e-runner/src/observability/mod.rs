//! Observability module for the runner.
//!
//! Provides run metrics rendering and tracing subscriber setup.

pub mod metrics;
pub mod tracing_init;
