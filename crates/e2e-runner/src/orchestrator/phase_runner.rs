//! Executes one phase of the test suite.
//!
//! Each phase reports into its own subdirectory of the report root, and the
//! report file name carries the run suffix, so runs with different suffixes
//! never share a report path.

use crate::config::Config;
use crate::errors::RunnerError;
use crate::eventual::bounded;
use crate::models::{Phase, PhaseReport};
use crate::services::test_engine::{EngineRequest, TestEngine};
use common::secret::SecretString;
use common::types::RunSuffix;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Report path for `phase`: `<report_dir>/<phase>/junit_<suffix>.xml`.
pub fn report_path(report_dir: &Path, phase: Phase, suffix: &RunSuffix) -> PathBuf {
    report_dir
        .join(phase.as_str())
        .join(format!("junit_{}.xml", suffix))
}

/// Runs phases through a `TestEngine`.
pub struct PhaseRunner {
    engine: Arc<dyn TestEngine>,
    suffix: RunSuffix,
    focus: Option<String>,
    skip: Option<String>,
    timeout: Duration,
}

impl PhaseRunner {
    pub fn new(engine: Arc<dyn TestEngine>, config: &Config) -> Self {
        Self {
            engine,
            suffix: config.suffix.clone(),
            focus: config.test_focus.clone(),
            skip: config.test_skip.clone(),
            timeout: config.phase_timeout,
        }
    }

    /// Run `phase`, reporting under `report_dir`.
    ///
    /// Failing test cases are returned in the report summary. Errors are
    /// returned only when reporting could not be set up
    /// (`RunnerError::PhaseSetup`), the engine could not run, or the phase
    /// exceeded its timeout (`RunnerError::Timeout`).
    #[instrument(skip_all, fields(phase = %phase))]
    pub async fn run_phase(
        &self,
        phase: Phase,
        report_dir: &Path,
        credential: Option<&SecretString>,
    ) -> Result<PhaseReport, RunnerError> {
        let path = report_path(report_dir, phase, &self.suffix);
        prepare_report_location(phase, &path)?;

        info!(target: "e2e.phase", report = %path.display(), "Running {}", phase.description());

        let request = EngineRequest {
            phase,
            focus: self.focus.clone(),
            skip: self.skip.clone(),
            report_path: path.clone(),
            suffix: self.suffix.clone(),
            credential: credential.cloned(),
        };

        let summary = bounded(
            &format!("{} phase", phase),
            self.timeout,
            self.engine.execute(&request),
        )
        .await?;

        info!(
            target: "e2e.phase",
            tests = summary.tests,
            failures = summary.failures,
            errors = summary.errors,
            skipped = summary.skipped,
            "Phase finished"
        );

        Ok(PhaseReport {
            phase,
            path,
            summary,
        })
    }
}

/// Create the phase directory (pre-existing is fine), check the report file
/// can be written and clear any stale report from an earlier run.
fn prepare_report_location(phase: Phase, path: &Path) -> Result<(), RunnerError> {
    let setup_error = |what: &str, e: std::io::Error| RunnerError::PhaseSetup {
        phase: phase.to_string(),
        message: format!("{} {}: {}", what, path.display(), e),
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| setup_error("cannot create directory for", e))?;
    }

    std::fs::File::create(path).map_err(|e| setup_error("cannot create", e))?;
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(setup_error("cannot clear", e)),
    }
}
