//! Run harness for orchestrator tests
//!
//! Provides `TestRun` for driving a complete run against mock collaborators.

use e2e_runner::config::Config;
use e2e_runner::orchestrator::state::RunResult;
use e2e_runner::orchestrator::{Collaborators, TestOrchestrator};
use e2e_runner::services::cluster_manager::mock::MockClusterManager;
use e2e_runner::services::metrics_publisher::mock::MockMetricsPublisher;
use e2e_runner::services::test_engine::mock::MockTestEngine;
use e2e_runner::services::upgrade::mock::MockUpgradeDriver;
use e2e_runner::services::versions::mock::MockVersionSelector;
use e2e_runner::services::workloads::mock::MockWorkloadClient;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Suffix every harness run uses unless overridden.
pub const TEST_SUFFIX: &str = "abc";

/// Credential supplied to attached-mode runs.
pub const TEST_KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n";

/// One orchestrated run wired to mocks, reporting into a scratch directory.
///
/// The mocks stay reachable after `run` so tests can inspect the calls made.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_owned_run_passes() -> Result<()> {
///     let run = TestRun::owned()?;
///     let result = run.run().await?;
///
///     assert!(!result.failed);
///     assert_eq!(run.clusters.delete_calls(), 1);
///     Ok(())
/// }
/// ```
pub struct TestRun {
    vars: HashMap<String, String>,
    report_dir: TempDir,
    pub clusters: Arc<MockClusterManager>,
    pub versions: Arc<MockVersionSelector>,
    pub engine: Arc<MockTestEngine>,
    pub upgrader: Arc<MockUpgradeDriver>,
    pub workloads: Arc<MockWorkloadClient>,
    pub metrics: Arc<MockMetricsPublisher>,
}

impl TestRun {
    fn with_vars(mut vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let report_dir = tempfile::Builder::new()
            .prefix("e2e-run-")
            .tempdir()
            .map_err(|e| anyhow::anyhow!("Failed to create report dir: {}", e))?;

        vars.insert("SUFFIX".to_string(), TEST_SUFFIX.to_string());
        vars.insert(
            "REPORT_DIR".to_string(),
            report_dir.path().display().to_string(),
        );

        Ok(Self {
            vars,
            report_dir,
            clusters: Arc::new(MockClusterManager::new()),
            versions: Arc::new(MockVersionSelector::new()),
            engine: Arc::new(MockTestEngine::passing()),
            upgrader: Arc::new(MockUpgradeDriver::succeeding()),
            workloads: Arc::new(MockWorkloadClient::default()),
            metrics: Arc::new(MockMetricsPublisher::accepting()),
        })
    }

    /// Run that provisions and owns its cluster.
    pub fn owned() -> Result<Self, anyhow::Error> {
        Self::with_vars(HashMap::from([(
            "OCM_TOKEN".to_string(),
            "test-token".to_string(),
        )]))
    }

    /// Run against an externally supplied cluster.
    pub fn attached() -> Result<Self, anyhow::Error> {
        Self::with_vars(HashMap::from([(
            "TEST_KUBECONFIG".to_string(),
            TEST_KUBECONFIG.to_string(),
        )]))
    }

    /// Set an environment variable for the run's configuration.
    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn clusters(mut self, clusters: MockClusterManager) -> Self {
        self.clusters = Arc::new(clusters);
        self
    }

    pub fn versions(mut self, versions: MockVersionSelector) -> Self {
        self.versions = Arc::new(versions);
        self
    }

    pub fn engine(mut self, engine: MockTestEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn upgrader(mut self, upgrader: MockUpgradeDriver) -> Self {
        self.upgrader = Arc::new(upgrader);
        self
    }

    pub fn workloads(mut self, workloads: MockWorkloadClient) -> Self {
        self.workloads = Arc::new(workloads);
        self
    }

    pub fn metrics(mut self, metrics: MockMetricsPublisher) -> Self {
        self.metrics = Arc::new(metrics);
        self
    }

    /// Root of the run's report tree.
    pub fn report_dir(&self) -> &Path {
        self.report_dir.path()
    }

    /// Configuration the run will use.
    pub fn config(&self) -> Result<Config, anyhow::Error> {
        Config::from_vars(&self.vars).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))
    }

    /// Collaborators backed by this harness's mocks.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            clusters: self.clusters.clone(),
            versions: self.versions.clone(),
            engine: self.engine.clone(),
            upgrader: self.upgrader.clone(),
            workloads: self.workloads.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Drive the run to completion.
    pub async fn run(&self) -> Result<RunResult, anyhow::Error> {
        let config = self.config()?;
        Ok(TestOrchestrator::new(self.collaborators()).run(&config).await)
    }
}
