//! Common configuration types for the e2e runner crates.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "e2e_runner=info,common=info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing filter directive (`RUST_LOG` syntax)
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Load from `RUST_LOG` and `LOG_FORMAT` (`text` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `CommonError::Configuration` for an unknown `LOG_FORMAT`.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let log_filter = vars
            .get("RUST_LOG")
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let json_logs = match vars.get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => false,
            Some(format) if format == "text" => false,
            Some(format) if format == "json" => true,
            Some(other) => {
                return Err(CommonError::Configuration(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        Ok(Self {
            log_filter,
            json_logs,
        })
    }
}
