//! Runner error types.
//!
//! `RunnerError` is the single error type crossing every collaborator seam.
//! Whether an error aborts the run is decided by the orchestrator from the
//! stage it occurred in, not by the variant alone; `Severity` records that
//! decision alongside the error in the run result.

use common::types::ClusterId;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Runner error type.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The provider definitively reported not enough quota.
    #[error("Insufficient quota to provision cluster '{0}'")]
    InsufficientQuota(String),

    /// The quota check itself could not be performed.
    #[error("Quota check failed: {0}")]
    QuotaCheck(String),

    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("Cluster API error: {0}")]
    ClusterApi(String),

    #[error("Version selection failed: {0}")]
    VersionSelection(String),

    /// A bounded operation did not finish in time.
    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// Reporting infrastructure for a phase could not be set up.
    #[error("Phase '{phase}' setup failed: {message}")]
    PhaseSetup { phase: String, message: String },

    #[error("Test engine error: {0}")]
    Engine(String),

    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    /// Upgrade failed in a way that makes post-upgrade tests meaningless.
    #[error("Unrecoverable upgrade failure: {0}")]
    UpgradeUnrecoverable(String),

    #[error("Missing cluster credential: {0}")]
    MissingCredential(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Metrics upload failed: {0}")]
    MetricsUpload(String),

    #[error("Cluster deletion failed for '{cluster_id}': {message}")]
    ClusterDelete {
        cluster_id: ClusterId,
        message: String,
    },

    #[error("Workload enumeration failed: {0}")]
    WorkloadList(String),

    #[error("Workload '{name}' deletion failed: {message}")]
    WorkloadDelete { name: String, message: String },

    /// The cluster API could not be reached or rejected a request.
    #[error("Kubernetes API error: {0}")]
    Kube(String),

    #[error("Command failed: {0}")]
    Command(String),
}

impl RunnerError {
    /// Build a timeout error for a named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        RunnerError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Whether this is a timeout, as opposed to an outright failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout { .. })
    }
}

/// How an error affected the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Aborted the run; remaining stages were skipped except cleanup.
    Fatal,
    /// A phase could not run; later phases were still attempted.
    Phase,
    /// Logged and collected; the run continued.
    NonFatal,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = RunnerError::timeout("cluster provisioning", Duration::from_secs(5));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("cluster provisioning"));
        assert!(!RunnerError::Provision("boom".to_string()).is_timeout());
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(serde_json::to_string(&Severity::NonFatal).unwrap(), "\"non_fatal\"");
        assert_eq!(serde_json::to_string(&Severity::Fatal).unwrap(), "\"fatal\"");
    }

    #[test]
    fn test_error_messages() {
        let err = RunnerError::WorkloadDelete {
            name: "proj-a".to_string(),
            message: "forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "Workload 'proj-a' deletion failed: forbidden");
    }
}
