//! Test-run orchestration.
//!
//! `TestOrchestrator::run` drives one run through its lifecycle:
//!
//! ```text
//! Init -> AttachOrProvision -> QuotaAdmitted? -> VersionSelected
//!      -> InstallPhaseDone -> UpgradeRequested? -> UpgradePhaseDone
//!      -> ReportsWritten -> MetricsPublished? -> CleanedUp -> Done
//! ```
//!
//! The stages up to `MetricsPublished` live in `drive`, where a fatal error
//! is returned with `?`. `run` then performs cleanup exactly once, whatever
//! `drive` returned.

pub mod cleanup;
pub mod phase_runner;
pub mod report;
pub mod state;

use crate::config::Config;
use crate::errors::{RunnerError, Severity};
use crate::eventual::bounded;
use crate::models::{ClusterBinding, ClusterMode, Phase, PhaseOutcome, ProvisionSpec, UpgradeTarget};
use crate::services::cluster_manager::{ClusterManager, OcmClusterManager};
use crate::services::metrics_publisher::{metrics_key, MetricsPublisher, S3MetricsPublisher};
use crate::services::ocm::OcmApi;
use crate::services::test_engine::{CommandTestEngine, TestEngine};
use crate::services::upgrade::{ClusterVersionUpgrader, UpgradeDriver};
use crate::services::versions::{
    DefaultVersionSelector, OcmVersionSource, ReleaseControllerClient, VersionSelector,
};
use crate::services::workloads::{NamespaceWorkloads, WorkloadClient};
use cleanup::CleanupCoordinator;
use common::secret::SecretString;
use phase_runner::PhaseRunner;
use report::{AggregateReport, ReportAggregator};
use state::{RunResult, RunStage, RunState};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub use state::RecordedError;

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub clusters: Arc<dyn ClusterManager>,
    pub versions: Arc<dyn VersionSelector>,
    pub engine: Arc<dyn TestEngine>,
    pub upgrader: Arc<dyn UpgradeDriver>,
    pub workloads: Arc<dyn WorkloadClient>,
    pub metrics: Arc<dyn MetricsPublisher>,
}

impl Collaborators {
    /// Real collaborators for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, RunnerError> {
        let api = OcmApi::new(config.provider_url.clone(), config.provider_token.clone())?;

        Ok(Self {
            clusters: Arc::new(OcmClusterManager::new(api.clone())),
            versions: Arc::new(DefaultVersionSelector::new(
                Arc::new(OcmVersionSource::new(api)),
                Arc::new(ReleaseControllerClient::new(
                    config.release_controller_url.clone(),
                )?),
            )),
            engine: Arc::new(CommandTestEngine::new(config.suite_command.clone())),
            upgrader: Arc::new(ClusterVersionUpgrader::new(config.upgrade_timeout)),
            workloads: Arc::new(NamespaceWorkloads::new()),
            metrics: Arc::new(S3MetricsPublisher::new(config.metrics_endpoint.clone())),
        })
    }
}

/// Drives one run at a time against one cluster.
pub struct TestOrchestrator {
    collaborators: Collaborators,
}

impl TestOrchestrator {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Execute a complete run.
    #[instrument(skip_all, fields(suffix = %config.suffix, mode = %config.mode(), dry_run = config.dry_run))]
    pub async fn run(&self, config: &Config) -> RunResult {
        info!(
            target: "e2e.orchestrator",
            report_dir = %config.report_dir.display(),
            environment = %config.environment,
            "Starting run"
        );

        let mut state = RunState::new();

        if let Err(e) = self.drive(config, &mut state).await {
            state.record(Severity::Fatal, e);
        }

        state.advance(RunStage::CleanedUp);
        let cleanup = CleanupCoordinator::new(
            self.collaborators.clusters.clone(),
            self.collaborators.workloads.clone(),
            config.destroy_cluster_after_test,
            config.environment.clone(),
            config.suffix.clone(),
            config.api_timeout,
        );
        for e in cleanup.cleanup(&mut state).await {
            state.record(Severity::NonFatal, e);
        }

        state.advance(RunStage::Done);
        let result = state.into_result();

        if result.failed {
            error!(target: "e2e.orchestrator", errors = result.errors.len(), "Run failed");
        } else {
            info!(target: "e2e.orchestrator", errors = result.errors.len(), "Run passed");
        }
        for recorded in &result.errors {
            info!(target: "e2e.orchestrator", severity = ?recorded.severity, "{}", recorded);
        }
        result
    }

    /// Every stage before cleanup. `Err` is a fatal abort.
    async fn drive(&self, config: &Config, state: &mut RunState) -> Result<(), RunnerError> {
        state.advance(RunStage::AttachOrProvision);
        self.attach(config, state).await?;

        let needs_provisioning = config.mode() == ClusterMode::Owned && state.binding().is_none();
        let mut spec = provision_spec(config);

        if needs_provisioning {
            state.advance(RunStage::QuotaAdmitted);
            self.admit(config, &spec, state).await?;
        }

        state.advance(RunStage::VersionSelected);
        self.select_versions(config, state).await?;

        if config.dry_run {
            info!(target: "e2e.orchestrator", "Dry run: skipping provisioning and tests");
            return Ok(());
        }

        if needs_provisioning {
            spec.version = state.versions.install.clone();
            self.provision(config, &spec, state).await?;
        }

        let runner = PhaseRunner::new(self.collaborators.engine.clone(), config);

        state.advance(RunStage::InstallPhaseDone);
        self.run_phase(&runner, Phase::Install, config, state).await?;

        if let Some(target) = state.versions.upgrade.clone() {
            state.advance(RunStage::UpgradeRequested);
            if self.upgrade(config, &target, state).await {
                state.advance(RunStage::UpgradePhaseDone);
                self.run_phase(&runner, Phase::Upgrade, config, state).await?;
            }
        } else if config.upgrade_configured() {
            state.phases.push(PhaseOutcome::Skipped {
                phase: Phase::Upgrade,
                reason: "upgrade target could not be resolved".to_string(),
            });
        }

        state.advance(RunStage::ReportsWritten);
        let report = match ReportAggregator::new(&config.report_dir).aggregate(config, state) {
            Ok(report) => {
                state.artifacts.push(report.metadata_path.clone());
                state.artifacts.extend(report.metrics_path.clone());
                Some(report)
            }
            Err(e) => {
                state.record(Severity::NonFatal, e);
                None
            }
        };

        if config.upload_metrics {
            state.advance(RunStage::MetricsPublished);
            if let Err(e) = self.publish_metrics(config, report.as_ref()).await {
                state.record(Severity::NonFatal, e);
            }
        }

        Ok(())
    }

    /// Bind an attached cluster, or an existing owned cluster by id.
    async fn attach(&self, config: &Config, state: &mut RunState) -> Result<(), RunnerError> {
        if let Some(credential) = &config.kubeconfig {
            info!(target: "e2e.orchestrator", "Credential supplied, testing attached cluster");
            return state.bind(ClusterBinding::Attached {
                credential: credential.clone(),
            });
        }

        if let Some(id) = &config.cluster_id {
            info!(target: "e2e.orchestrator", cluster_id = %id, "Using existing cluster");
            let handle = bounded(
                "cluster lookup",
                config.api_timeout,
                self.collaborators.clusters.attach(id),
            )
            .await?;
            return state.bind(ClusterBinding::Owned(handle));
        }

        Ok(())
    }

    /// Quota gate. Only a definitive "insufficient" aborts the run.
    async fn admit(
        &self,
        config: &Config,
        spec: &ProvisionSpec,
        state: &mut RunState,
    ) -> Result<(), RunnerError> {
        let checked = bounded(
            "quota check",
            config.api_timeout,
            self.collaborators.clusters.check_quota(spec),
        )
        .await;

        match checked {
            Ok(true) => {
                info!(target: "e2e.orchestrator", "Quota admitted");
                Ok(())
            }
            Ok(false) => Err(RunnerError::InsufficientQuota(spec.name.clone())),
            Err(e) => {
                // Proceed optimistically; provisioning fails later if quota is really short.
                warn!(target: "e2e.orchestrator", "Quota check could not be performed, proceeding without confirmation");
                let e = if e.is_timeout() {
                    e
                } else {
                    RunnerError::QuotaCheck(e.to_string())
                };
                state.record(Severity::NonFatal, e);
                Ok(())
            }
        }
    }

    async fn select_versions(&self, config: &Config, state: &mut RunState) -> Result<(), RunnerError> {
        let owned = config.mode() == ClusterMode::Owned;

        if owned {
            let install = bounded(
                "install version selection",
                config.api_timeout,
                self.collaborators.versions.select_install_version(config),
            )
            .await?;
            info!(target: "e2e.orchestrator", version = %install, "Install version selected");
            state.versions.install = Some(install);
        }

        if config.upgrade_configured() {
            let upgrade = bounded(
                "upgrade target selection",
                config.api_timeout,
                self.collaborators.versions.select_upgrade_target(config),
            )
            .await;

            match upgrade {
                Ok(target) => state.versions.upgrade = target,
                Err(e) if owned => return Err(e),
                Err(e) => state.record(Severity::NonFatal, e),
            }
        }

        Ok(())
    }

    /// Create the run's cluster and wait for it.
    ///
    /// The id is recorded as soon as the cluster exists, so a failure or
    /// timeout while waiting still leaves it to cleanup.
    async fn provision(
        &self,
        config: &Config,
        spec: &ProvisionSpec,
        state: &mut RunState,
    ) -> Result<(), RunnerError> {
        info!(target: "e2e.orchestrator", cluster_name = %spec.name, version = ?spec.version, "Provisioning cluster");

        // Bounded by the provider client's request timeout; cancelling it could
        // orphan a cluster whose id was never seen.
        let id = self.collaborators.clusters.create(spec).await?;
        state.partial_cluster = Some(id.clone());

        let handle = bounded(
            "cluster provisioning",
            config.cluster_up_timeout.saturating_add(config.api_timeout),
            self.collaborators.clusters.wait_ready(&id, spec),
        )
        .await?;

        info!(target: "e2e.orchestrator", cluster_id = %handle.id, "Cluster provisioned");
        state.bind(ClusterBinding::Owned(handle))?;
        state.partial_cluster = None;
        Ok(())
    }

    /// Run one phase and record its outcome.
    ///
    /// Setup and engine failures skip the phase; a timeout aborts the run.
    async fn run_phase(
        &self,
        runner: &PhaseRunner,
        phase: Phase,
        config: &Config,
        state: &mut RunState,
    ) -> Result<(), RunnerError> {
        let credential: Option<SecretString> =
            state.binding().and_then(ClusterBinding::credential).cloned();

        state.active_phase = Some(phase);
        let result = runner
            .run_phase(phase, &config.report_dir, credential.as_ref())
            .await;
        state.active_phase = None;

        match result {
            Ok(report) => {
                state.phases.push(PhaseOutcome::Completed(report));
                Ok(())
            }
            Err(e) => {
                state.phases.push(PhaseOutcome::Failed {
                    phase,
                    reason: e.to_string(),
                });
                if e.is_timeout() {
                    return Err(e);
                }
                state.record(Severity::Phase, e);
                Ok(())
            }
        }
    }

    /// Upgrade the cluster. Returns whether the post-upgrade phase should run.
    async fn upgrade(&self, config: &Config, target: &UpgradeTarget, state: &mut RunState) -> bool {
        let Some(credential) = state.binding().and_then(ClusterBinding::credential).cloned() else {
            warn!(target: "e2e.orchestrator", "No cluster credential available, unable to run upgrade");
            state.record(
                Severity::NonFatal,
                RunnerError::MissingCredential("upgrade skipped".to_string()),
            );
            state.phases.push(PhaseOutcome::Skipped {
                phase: Phase::Upgrade,
                reason: "no cluster credential".to_string(),
            });
            return false;
        };

        info!(target: "e2e.orchestrator", upgrade_target = %target, "Upgrading cluster");
        let upgraded = bounded(
            "cluster upgrade",
            config.upgrade_timeout.saturating_add(config.api_timeout),
            self.collaborators.upgrader.upgrade(&credential, target),
        )
        .await;

        match upgraded {
            Ok(()) => true,
            Err(e @ RunnerError::UpgradeUnrecoverable(_)) => {
                state.phases.push(PhaseOutcome::Failed {
                    phase: Phase::Upgrade,
                    reason: e.to_string(),
                });
                state.record(Severity::Phase, e);
                false
            }
            // The cluster is still testable; the post-upgrade phase decides the outcome.
            Err(e) => {
                state.record(Severity::NonFatal, e);
                true
            }
        }
    }

    async fn publish_metrics(
        &self,
        config: &Config,
        report: Option<&AggregateReport>,
    ) -> Result<(), RunnerError> {
        let path = report
            .and_then(|r| r.metrics_path.as_ref())
            .ok_or_else(|| RunnerError::MetricsUpload("no metrics artifact was written".to_string()))?;
        let key = metrics_key(path)?;

        bounded(
            "metrics upload",
            config.api_timeout,
            self.collaborators
                .metrics
                .upload(path, &config.metrics_bucket, &key),
        )
        .await?;

        info!(target: "e2e.orchestrator", bucket = %config.metrics_bucket, key = %key, "Metrics published");
        Ok(())
    }
}

fn provision_spec(config: &Config) -> ProvisionSpec {
    ProvisionSpec {
        name: config.cluster_name.clone(),
        version: None,
        environment: config.environment.clone(),
        multi_az: config.multi_az,
        expiry_minutes: config.cluster_expiry_minutes,
        ready_timeout: config.cluster_up_timeout,
    }
}
