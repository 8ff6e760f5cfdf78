//! Run state and result types.
//!
//! `RunState` is owned by exactly one orchestrator for the lifetime of one
//! run. It carries the cluster binding explicitly so that phase execution and
//! cleanup receive it by reference instead of reaching for shared state.

use crate::errors::{RunnerError, Severity};
use crate::models::{ClusterBinding, ClusterMode, Phase, PhaseOutcome, SelectedVersions};
use chrono::{DateTime, Utc};
use common::types::ClusterId;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, warn};

/// Stages of the run lifecycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    AttachOrProvision,
    QuotaAdmitted,
    VersionSelected,
    InstallPhaseDone,
    UpgradeRequested,
    UpgradePhaseDone,
    ReportsWritten,
    MetricsPublished,
    CleanedUp,
    Done,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Init => "init",
            RunStage::AttachOrProvision => "attach_or_provision",
            RunStage::QuotaAdmitted => "quota_admitted",
            RunStage::VersionSelected => "version_selected",
            RunStage::InstallPhaseDone => "install_phase_done",
            RunStage::UpgradeRequested => "upgrade_requested",
            RunStage::UpgradePhaseDone => "upgrade_phase_done",
            RunStage::ReportsWritten => "reports_written",
            RunStage::MetricsPublished => "metrics_published",
            RunStage::CleanedUp => "cleaned_up",
            RunStage::Done => "done",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error collected during the run, with where it happened and how it
/// affected the run.
#[derive(Debug)]
pub struct RecordedError {
    pub stage: RunStage,
    pub severity: Severity,
    pub error: RunnerError,
}

impl fmt::Display for RecordedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.error)
    }
}

/// The orchestrator's working state for one run.
#[derive(Debug)]
pub struct RunState {
    /// Current stage.
    pub stage: RunStage,
    /// Every stage entered, in order.
    pub stages: Vec<RunStage>,
    /// Phase currently executing.
    pub active_phase: Option<Phase>,
    /// The one cluster bound to this run.
    binding: Option<ClusterBinding>,
    /// Cluster created by provisioning but not (yet) bound to the run.
    pub partial_cluster: Option<ClusterId>,
    pub versions: SelectedVersions,
    pub phases: Vec<PhaseOutcome>,
    pub errors: Vec<RecordedError>,
    /// Files written by the run (metadata, metrics).
    pub artifacts: Vec<PathBuf>,
    /// Set once cleanup has run; later cleanup calls are no-ops.
    pub cluster_released: bool,
    pub started_at: DateTime<Utc>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            stage: RunStage::Init,
            stages: vec![RunStage::Init],
            active_phase: None,
            binding: None,
            partial_cluster: None,
            versions: SelectedVersions::default(),
            phases: Vec::new(),
            errors: Vec::new(),
            artifacts: Vec::new(),
            cluster_released: false,
            started_at: Utc::now(),
        }
    }

    /// Enter `stage`.
    pub fn advance(&mut self, stage: RunStage) {
        self.stage = stage;
        self.stages.push(stage);
    }

    /// Bind the run's cluster.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Provision` if a cluster is already bound.
    pub fn bind(&mut self, binding: ClusterBinding) -> Result<(), RunnerError> {
        if self.binding.is_some() {
            return Err(RunnerError::Provision(
                "a cluster is already bound to this run".to_string(),
            ));
        }
        self.binding = Some(binding);
        Ok(())
    }

    pub fn binding(&self) -> Option<&ClusterBinding> {
        self.binding.as_ref()
    }

    /// Id of the owned cluster, whether fully provisioned or partial.
    pub fn owned_cluster_id(&self) -> Option<&ClusterId> {
        self.binding
            .as_ref()
            .and_then(ClusterBinding::owned_id)
            .or(self.partial_cluster.as_ref())
    }

    /// Record an error against the current stage.
    pub fn record(&mut self, severity: Severity, error: RunnerError) {
        match severity {
            Severity::Fatal => {
                error!(target: "e2e.orchestrator", stage = %self.stage, error = %error, "Fatal error, aborting run");
            }
            Severity::Phase | Severity::NonFatal => {
                warn!(target: "e2e.orchestrator", stage = %self.stage, severity = ?severity, error = %error, "Error recorded, continuing");
            }
        }
        self.errors.push(RecordedError {
            stage: self.stage,
            severity,
            error,
        });
    }

    pub fn has_fatal(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Fatal)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.errors.iter().filter(|e| e.severity == severity).count()
    }

    /// Whether the run has failed so far.
    ///
    /// Fatal and phase errors fail the run, as does any failing phase.
    /// Non-fatal errors are reported but do not.
    pub fn failed(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e.severity, Severity::Fatal | Severity::Phase))
            || self.phases.iter().any(PhaseOutcome::is_failing)
    }

    /// Whether any phase got as far as invoking the test engine.
    pub fn any_phase_started(&self) -> bool {
        self.phases
            .iter()
            .any(|p| !matches!(p, PhaseOutcome::Skipped { .. }))
    }

    pub fn into_result(self) -> RunResult {
        let failed = self.failed();
        let mode = self.binding.as_ref().map(ClusterBinding::mode);
        let cluster_id = self.owned_cluster_id().cloned();
        RunResult {
            failed,
            mode,
            cluster_id,
            stages: self.stages,
            phases: self.phases,
            versions: self.versions,
            errors: self.errors,
            artifacts: self.artifacts,
        }
    }
}

/// Outcome of a run.
#[derive(Debug)]
pub struct RunResult {
    pub failed: bool,
    /// Mode of the bound cluster, if one was bound.
    pub mode: Option<ClusterMode>,
    pub cluster_id: Option<ClusterId>,
    pub stages: Vec<RunStage>,
    pub phases: Vec<PhaseOutcome>,
    pub versions: SelectedVersions,
    pub errors: Vec<RecordedError>,
    pub artifacts: Vec<PathBuf>,
}

impl RunResult {
    /// How many times the run entered `stage`.
    pub fn stage_count(&self, stage: RunStage) -> usize {
        self.stages.iter().filter(|s| **s == stage).count()
    }

    pub fn reached(&self, stage: RunStage) -> bool {
        self.stage_count(stage) > 0
    }

    pub fn errors_with(&self, severity: Severity) -> impl Iterator<Item = &RecordedError> {
        self.errors.iter().filter(move |e| e.severity == severity)
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|p| p.phase() == phase)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ClusterHandle, PhaseReport, TestSummary};
    use common::secret::SecretString;

    fn owned(id: &str) -> ClusterBinding {
        ClusterBinding::Owned(ClusterHandle {
            id: ClusterId::new(id).unwrap(),
            name: "e2e-abc".to_string(),
            credential: None,
        })
    }

    #[test]
    fn test_at_most_one_cluster_bound() {
        let mut state = RunState::new();
        state.bind(owned("c1")).unwrap();

        let second = state.bind(ClusterBinding::Attached {
            credential: SecretString::from("kc"),
        });
        assert!(second.is_err());
        assert_eq!(state.owned_cluster_id().map(ClusterId::as_str), Some("c1"));
    }

    #[test]
    fn test_partial_cluster_is_owned_id() {
        let mut state = RunState::new();
        state.partial_cluster = Some(ClusterId::new("half").unwrap());
        assert_eq!(state.owned_cluster_id().map(ClusterId::as_str), Some("half"));
    }

    #[test]
    fn test_non_fatal_errors_do_not_fail_run() {
        let mut state = RunState::new();
        state.record(
            Severity::NonFatal,
            RunnerError::MetricsUpload("denied".to_string()),
        );
        assert!(!state.failed());
        assert_eq!(state.count(Severity::NonFatal), 1);

        state.record(Severity::Phase, RunnerError::Engine("crash".to_string()));
        assert!(state.failed());
        assert!(!state.has_fatal());
    }

    #[test]
    fn test_failing_phase_fails_run() {
        let mut state = RunState::new();
        state.phases.push(PhaseOutcome::Completed(PhaseReport {
            phase: Phase::Install,
            path: PathBuf::from("/tmp/x/install/junit_abc.xml"),
            summary: TestSummary {
                tests: 3,
                failures: 1,
                errors: 0,
                skipped: 0,
            },
        }));
        assert!(state.failed());
        assert!(state.any_phase_started());
    }

    #[test]
    fn test_errors_recorded_against_current_stage() {
        let mut state = RunState::new();
        state.advance(RunStage::QuotaAdmitted);
        state.record(
            Severity::Fatal,
            RunnerError::InsufficientQuota("e2e-abc".to_string()),
        );

        let result = state.into_result();
        assert!(result.failed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors.first().map(|e| e.stage), Some(RunStage::QuotaAdmitted));
        assert_eq!(result.stages, vec![RunStage::Init, RunStage::QuotaAdmitted]);
    }
}
