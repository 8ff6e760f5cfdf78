//! Run-level report artifacts.
//!
//! Writes the metadata JSON summarising the run and the Prometheus metrics
//! file derived from it. Phase reports are never modified here; a phase
//! whose report is missing is recorded as absent.

use crate::config::Config;
use crate::errors::{RunnerError, Severity};
use crate::models::{ClusterBinding, ClusterMode, Phase, PhaseOutcome, TestSummary, UpgradeTarget};
use crate::observability::metrics::render_run_metrics;
use crate::orchestrator::state::RunState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Fixed name of the metadata artifact.
pub const METADATA_FILE: &str = "custom-prow-metadata.json";

/// Name of the metrics artifact: `<job>.<suffix>.metrics.prom`.
pub fn metrics_file_name(job_name: Option<&str>, suffix: &str) -> String {
    format!("{}.{}.metrics.prom", job_name.unwrap_or("e2e-runner"), suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Passed,
    Failed,
    /// The phase could not run.
    Error,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Passed => "passed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Error => "error",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

/// One phase as recorded in the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseEntry {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub report: Option<PathBuf>,
    /// Whether the report file existed when the metadata was written.
    pub report_present: bool,
    pub summary: Option<TestSummary>,
    pub reason: Option<String>,
}

impl PhaseEntry {
    fn from_outcome(outcome: &PhaseOutcome) -> Self {
        match outcome {
            PhaseOutcome::Completed(report) => Self {
                phase: report.phase,
                status: if report.summary.has_failures() {
                    PhaseStatus::Failed
                } else {
                    PhaseStatus::Passed
                },
                report: Some(report.path.clone()),
                report_present: report.path.is_file(),
                summary: Some(report.summary),
                reason: None,
            },
            PhaseOutcome::Failed { phase, reason } => Self {
                phase: *phase,
                status: PhaseStatus::Error,
                report: None,
                report_present: false,
                summary: None,
                reason: Some(reason.clone()),
            },
            PhaseOutcome::Skipped { phase, reason } => Self {
                phase: *phase,
                status: PhaseStatus::Skipped,
                report: None,
                report_present: false,
                summary: None,
                reason: Some(reason.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCounts {
    pub fatal: usize,
    pub phase: usize,
    pub non_fatal: usize,
}

/// Contents of the metadata artifact.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub suffix: String,
    pub job_name: Option<String>,
    pub environment: String,
    pub mode: ClusterMode,
    pub cluster_id: Option<String>,
    pub cluster_name: Option<String>,
    pub install_version: Option<String>,
    pub upgrade_target: Option<UpgradeTarget>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Whether the run had failed by the time reports were written.
    pub failed: bool,
    pub errors: ErrorCounts,
    pub phases: Vec<PhaseEntry>,
}

impl RunMetadata {
    pub fn collect(config: &Config, state: &RunState) -> Self {
        let cluster_name = match state.binding() {
            Some(ClusterBinding::Owned(handle)) => Some(handle.name.clone()),
            Some(ClusterBinding::Attached { .. }) => None,
            None => state.partial_cluster.as_ref().map(|_| config.cluster_name.clone()),
        };

        Self {
            suffix: config.suffix.to_string(),
            job_name: config.job_name.clone(),
            environment: config.environment.clone(),
            mode: config.mode(),
            cluster_id: state.owned_cluster_id().map(ToString::to_string),
            cluster_name,
            install_version: state.versions.install.clone(),
            upgrade_target: state.versions.upgrade.clone(),
            dry_run: config.dry_run,
            started_at: state.started_at,
            finished_at: Utc::now(),
            failed: state.failed(),
            errors: ErrorCounts {
                fatal: state.count(Severity::Fatal),
                phase: state.count(Severity::Phase),
                non_fatal: state.count(Severity::NonFatal),
            },
            phases: state.phases.iter().map(PhaseEntry::from_outcome).collect(),
        }
    }
}

/// Artifacts written by the aggregator.
#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub metadata_path: PathBuf,
    /// Absent if the metrics file could not be written.
    pub metrics_path: Option<PathBuf>,
    pub metadata: RunMetadata,
}

/// Writes run-level artifacts under the report root.
pub struct ReportAggregator {
    report_dir: PathBuf,
}

impl ReportAggregator {
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
        }
    }

    /// Write the metadata and metrics artifacts.
    ///
    /// Succeeds with zero phases. A failure to write the metrics file is
    /// logged and leaves `metrics_path` empty; only a failure to write the
    /// metadata is an error.
    #[instrument(skip_all, fields(report_dir = %self.report_dir.display()))]
    pub fn aggregate(&self, config: &Config, state: &RunState) -> Result<AggregateReport, RunnerError> {
        std::fs::create_dir_all(&self.report_dir).map_err(|e| {
            RunnerError::Report(format!("cannot create {}: {}", self.report_dir.display(), e))
        })?;

        let metadata = RunMetadata::collect(config, state);
        for entry in metadata.phases.iter().filter(|p| p.report.is_some() && !p.report_present) {
            warn!(target: "e2e.report", phase = %entry.phase, "Phase report missing, recording as absent");
        }

        let metadata_path = self.report_dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| RunnerError::Report(format!("cannot serialize metadata: {}", e)))?;
        write_file(&metadata_path, &json)?;
        info!(target: "e2e.report", path = %metadata_path.display(), "Wrote run metadata");

        let metrics_path = self.report_dir.join(metrics_file_name(
            config.job_name.as_deref(),
            config.suffix.as_str(),
        ));
        let metrics_path = match write_file(&metrics_path, render_run_metrics(&metadata).as_bytes()) {
            Ok(()) => {
                info!(target: "e2e.report", path = %metrics_path.display(), "Wrote run metrics");
                Some(metrics_path)
            }
            Err(e) => {
                warn!(target: "e2e.report", error = %e, "Could not write run metrics");
                None
            }
        };

        Ok(AggregateReport {
            metadata_path,
            metrics_path,
            metadata,
        })
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), RunnerError> {
    std::fs::write(path, contents)
        .map_err(|e| RunnerError::Report(format!("cannot write {}: {}", path.display(), e)))
}
