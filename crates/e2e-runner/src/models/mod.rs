//! Runner models.
//!
//! Contains data types passed between the orchestrator and its collaborators.

use common::secret::SecretString;
use common::types::ClusterId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Who is responsible for the cluster lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// The runner creates and destroys the cluster under test.
    Owned,

    /// The runner tests a pre-existing cluster reached through a supplied
    /// credential and never creates or destroys it.
    Attached,
}

impl ClusterMode {
    /// Returns the string representation of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMode::Owned => "owned",
            ClusterMode::Attached => "attached",
        }
    }
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, isolated execution of the test suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Tests against the freshly installed cluster.
    Install,

    /// Tests against the cluster after it was upgraded.
    Upgrade,
}

impl Phase {
    /// Returns the string representation of the phase.
    ///
    /// Also used as the phase's report subdirectory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Install => "install",
            Phase::Upgrade => "upgrade",
        }
    }

    /// Human-readable suite description for the phase.
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Install => "e2e suite",
            Phase::Upgrade => "e2e suite post-upgrade",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for provisioning a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSpec {
    pub name: String,
    /// Install version chosen by the version selector.
    pub version: Option<String>,
    pub environment: String,
    pub multi_az: bool,
    pub expiry_minutes: u64,
    /// How long the manager may wait for the cluster to become ready.
    pub ready_timeout: Duration,
}

/// A cluster created or reused by the runner in owned mode.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub id: ClusterId,
    pub name: String,
    /// Access credential, once the provider has issued one.
    pub credential: Option<SecretString>,
}

/// The cluster bound to a run.
///
/// At most one binding exists per run; the orchestrator never provisions
/// while one is present.
#[derive(Debug, Clone)]
pub enum ClusterBinding {
    /// Created or reused by the runner; deletion follows the destroy policy.
    Owned(ClusterHandle),

    /// Supplied from outside; only in-cluster workloads are cleaned up.
    Attached { credential: SecretString },
}

impl ClusterBinding {
    /// Credential usable to reach the cluster, if any.
    pub fn credential(&self) -> Option<&SecretString> {
        match self {
            ClusterBinding::Owned(handle) => handle.credential.as_ref(),
            ClusterBinding::Attached { credential } => Some(credential),
        }
    }

    /// Id of an owned cluster.
    pub fn owned_id(&self) -> Option<&ClusterId> {
        match self {
            ClusterBinding::Owned(handle) => Some(&handle.id),
            ClusterBinding::Attached { .. } => None,
        }
    }

    pub fn mode(&self) -> ClusterMode {
        match self {
            ClusterBinding::Owned(_) => ClusterMode::Owned,
            ClusterBinding::Attached { .. } => ClusterMode::Attached,
        }
    }
}

/// Where the cluster is upgraded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpgradeTarget {
    /// Explicit release image.
    Image { pull_spec: String },

    /// Release resolved from a named release stream.
    Release {
        stream: String,
        name: String,
        pull_spec: String,
    },
}

impl UpgradeTarget {
    /// Image reference the cluster is upgraded to.
    pub fn pull_spec(&self) -> &str {
        match self {
            UpgradeTarget::Image { pull_spec } | UpgradeTarget::Release { pull_spec, .. } => {
                pull_spec
            }
        }
    }
}

impl fmt::Display for UpgradeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeTarget::Image { pull_spec } => write!(f, "image {}", pull_spec),
            UpgradeTarget::Release { stream, name, .. } => {
                write!(f, "release {} from stream {}", name, stream)
            }
        }
    }
}

/// Versions chosen for the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectedVersions {
    pub install: Option<String>,
    pub upgrade: Option<UpgradeTarget>,
}

/// Pass/fail/error counts read back from a phase report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl TestSummary {
    /// Whether any test case failed or errored.
    pub fn has_failures(&self) -> bool {
        self.failures > 0 || self.errors > 0
    }

    /// Test cases that ran and passed.
    pub fn passed(&self) -> u32 {
        self.tests
            .saturating_sub(self.failures)
            .saturating_sub(self.errors)
            .saturating_sub(self.skipped)
    }
}

/// One executed phase. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub path: PathBuf,
    pub summary: TestSummary,
}

/// What happened to a phase during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase ran; test failures live in the report.
    Completed(PhaseReport),

    /// Phase infrastructure failed; the phase did not run.
    Failed { phase: Phase, reason: String },

    /// The phase was deliberately not run (for example, no credential for upgrade).
    Skipped { phase: Phase, reason: String },
}

impl PhaseOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseOutcome::Completed(report) => report.phase,
            PhaseOutcome::Failed { phase, .. } | PhaseOutcome::Skipped { phase, .. } => *phase,
        }
    }

    /// Whether this phase makes the run fail.
    pub fn is_failing(&self) -> bool {
        match self {
            PhaseOutcome::Completed(report) => report.summary.has_failures(),
            PhaseOutcome::Failed { .. } => true,
            PhaseOutcome::Skipped { .. } => false,
        }
    }
}

/// In-cluster namespaced state created by tests (attached mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
}

impl Workload {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
