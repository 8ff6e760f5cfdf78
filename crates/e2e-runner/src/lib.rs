//! End-to-end test runner library.
//!
//! This library drives end-to-end validation of a managed cluster product:
//!
//! - Provisions a cluster (or attaches to an existing one)
//! - Admits the run against the account's quota
//! - Selects install and upgrade versions
//! - Runs the test suite in an install phase and an optional upgrade phase
//! - Writes JUnit reports, run metadata and metrics, and uploads metrics
//! - Reclaims every resource it created, whatever the outcome
//!
//! # Architecture
//!
//! The orchestrator sequences collaborators it only knows through traits:
//!
//! ```text
//! main.rs -> orchestrator/mod.rs -> services/*.rs (ClusterManager, VersionSelector,
//!            TestEngine, UpgradeDriver, WorkloadClient, MetricsPublisher)
//! ```
//!
//! # Modules
//!
//! - `config` - Run configuration from environment
//! - `errors` - Error types and severities
//! - `eventual` - Timeouts and backoff polling
//! - `models` - Data models
//! - `observability` - Run metrics and tracing setup
//! - `orchestrator` - Run lifecycle, phases, reports, cleanup
//! - `services` - External collaborators and their mocks

pub mod config;
pub mod errors;
pub mod eventual;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod services;

pub use config::Config;
pub use errors::{RunnerError, Severity};
pub use orchestrator::state::{RunResult, RunStage};
pub use orchestrator::{Collaborators, TestOrchestrator};
