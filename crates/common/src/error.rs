//! Common error types for the e2e runner crates.

use thiserror::Error;

/// Errors raised while validating shared identifiers and settings
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommonError {
    /// Run suffix contains characters that are unsafe in file names or labels
    #[error("Invalid run suffix '{0}': expected 1-32 characters of [a-z0-9-]")]
    InvalidSuffix(String),

    /// Cluster identifier is empty or malformed
    #[error("Invalid cluster id: {0}")]
    InvalidClusterId(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
