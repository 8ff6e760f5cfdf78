//! # E2E Test Utilities
//!
//! Shared test utilities for the e2e runner.
//!
//! This crate provides:
//! - Run harness (`TestRun` wiring the orchestrator to mock collaborators)
//! - Custom assertions (`RunAssertions` trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use e2e_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let run = TestRun::attached()?;
//!     let result = run.run().await?;
//!
//!     result.assert_passed().assert_cleaned_up_once();
//!     assert_eq!(run.clusters.provision_calls(), 0);
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod run_harness;

// Re-export commonly used items
pub use assertions::*;
pub use run_harness::*;
