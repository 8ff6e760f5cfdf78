//! Test-execution engine.
//!
//! The engine runs the suite for one phase, writes a JUnit report to the
//! path it is given and returns the counts read back from that report.
//! Failing test cases are a normal result, not an error.

use crate::errors::RunnerError;
use crate::models::{Phase, TestSummary};
use crate::services::kubeconfig::KubeconfigFile;
use common::secret::SecretString;
use common::types::RunSuffix;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// What the engine should run and where it should report.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub phase: Phase,
    pub focus: Option<String>,
    pub skip: Option<String>,
    /// JUnit report sink.
    pub report_path: PathBuf,
    pub suffix: RunSuffix,
    pub credential: Option<SecretString>,
}

/// Trait for test execution (enables mocking).
#[async_trait::async_trait]
pub trait TestEngine: Send + Sync {
    async fn execute(&self, request: &EngineRequest) -> Result<TestSummary, RunnerError>;
}

/// Sum the counts of every `<testsuite>` element in a JUnit document.
///
/// Falls back to the `<testsuites>` root when the document has no
/// individual suites.
pub fn parse_junit_summary(xml: &str) -> Result<TestSummary, RunnerError> {
    let suite = Regex::new(r"<testsuite\b([^>]*)>")
        .map_err(|e| RunnerError::Report(e.to_string()))?;
    let root = Regex::new(r"<testsuites\b([^>]*)>")
        .map_err(|e| RunnerError::Report(e.to_string()))?;
    let attr = Regex::new(r#"\b(tests|failures|errors|skipped|disabled)="(\d+)""#)
        .map_err(|e| RunnerError::Report(e.to_string()))?;

    let mut elements: Vec<&str> = suite
        .captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if elements.is_empty() {
        elements = root
            .captures_iter(xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
    }
    if elements.is_empty() {
        return Err(RunnerError::Report("no testsuite element in report".to_string()));
    }

    let mut summary = TestSummary::default();
    for attributes in elements {
        for capture in attr.captures_iter(attributes) {
            let (Some(name), Some(value)) = (capture.get(1), capture.get(2)) else {
                continue;
            };
            let value: u32 = value.as_str().parse().unwrap_or(0);
            match name.as_str() {
                "tests" => summary.tests = summary.tests.saturating_add(value),
                "failures" => summary.failures = summary.failures.saturating_add(value),
                "errors" => summary.errors = summary.errors.saturating_add(value),
                "skipped" | "disabled" => summary.skipped = summary.skipped.saturating_add(value),
                _ => {}
            }
        }
    }
    Ok(summary)
}

/// Read counts back from a report file.
pub fn read_junit_summary(path: &Path) -> Result<TestSummary, RunnerError> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| RunnerError::Report(format!("cannot read {}: {}", path.display(), e)))?;
    parse_junit_summary(&xml)
}

/// `TestEngine` that runs the suite binary once per phase.
///
/// The suite receives its parameters through the environment:
/// `E2E_PHASE`, `E2E_FOCUS`, `E2E_SKIP`, `E2E_JUNIT_REPORT`, `E2E_SUFFIX` and
/// `KUBECONFIG`.
pub struct CommandTestEngine {
    command: String,
    args: Vec<String>,
}

impl CommandTestEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Arguments for the suite command.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait::async_trait]
impl TestEngine for CommandTestEngine {
    #[instrument(skip_all, fields(phase = %request.phase))]
    async fn execute(&self, request: &EngineRequest) -> Result<TestSummary, RunnerError> {
        let kubeconfig = request
            .credential
            .as_ref()
            .map(KubeconfigFile::write)
            .transpose()
            .map_err(|e| RunnerError::Engine(e.to_string()))?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .env("E2E_PHASE", request.phase.as_str())
            .env("E2E_JUNIT_REPORT", &request.report_path)
            .env("E2E_SUFFIX", request.suffix.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(focus) = &request.focus {
            cmd.env("E2E_FOCUS", focus);
        }
        if let Some(skip) = &request.skip {
            cmd.env("E2E_SKIP", skip);
        }
        if let Some(kubeconfig) = &kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig.path());
        }

        let status = cmd.status().await.map_err(|e| {
            RunnerError::Engine(format!("failed to start {}: {}", self.command, e))
        })?;

        info!(target: "e2e.services.engine", status = %status, "Test suite exited");

        match read_junit_summary(&request.report_path) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                // No readable report means no trustworthy result.
                warn!(target: "e2e.services.engine", error = %e, status = %status, "Suite produced no readable report");
                Ok(TestSummary {
                    errors: 1,
                    ..TestSummary::default()
                })
            }
        }
    }
}

/// Mock test engine module for testing.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Mutex, PoisonError};

    /// Mock engine that writes a JUnit report with scripted counts.
    pub struct MockTestEngine {
        summaries: HashMap<Phase, TestSummary>,
        failing: HashSet<Phase>,
        hang: bool,
        requests: Mutex<Vec<EngineRequest>>,
    }

    impl Default for MockTestEngine {
        fn default() -> Self {
            Self::passing()
        }
    }

    impl MockTestEngine {
        /// Every phase runs ten passing tests.
        pub fn passing() -> Self {
            Self {
                summaries: HashMap::new(),
                failing: HashSet::new(),
                hang: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn with_failures(mut self, phase: Phase, failures: u32) -> Self {
            self.summaries.insert(
                phase,
                TestSummary {
                    tests: 10,
                    failures,
                    errors: 0,
                    skipped: 0,
                },
            );
            self
        }

        /// The engine cannot run `phase` at all.
        pub fn failing_phase(mut self, phase: Phase) -> Self {
            self.failing.insert(phase);
            self
        }

        pub fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }

        pub fn requests(&self) -> Vec<EngineRequest> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn executed_phases(&self) -> Vec<Phase> {
            self.requests().iter().map(|r| r.phase).collect()
        }
    }

    fn junit(phase: Phase, summary: &TestSummary) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites tests="{t}" failures="{f}" errors="{e}">
  <testsuite name="{name}" tests="{t}" failures="{f}" errors="{e}" skipped="{s}"></testsuite>
</testsuites>
"#,
            t = summary.tests,
            f = summary.failures,
            e = summary.errors,
            s = summary.skipped,
            name = phase.description(),
        )
    }

    #[async_trait::async_trait]
    impl TestEngine for MockTestEngine {
        async fn execute(&self, request: &EngineRequest) -> Result<TestSummary, RunnerError> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());

            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(&request.phase) {
                return Err(RunnerError::Engine(format!(
                    "mock: suite crashed in {} phase",
                    request.phase
                )));
            }

            let summary = self.summaries.get(&request.phase).copied().unwrap_or(TestSummary {
                tests: 10,
                failures: 0,
                errors: 0,
                skipped: 0,
            });
            std::fs::write(&request.report_path, junit(request.phase, &summary))
                .map_err(|e| RunnerError::Engine(e.to_string()))?;
            Ok(summary)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const GINKGO_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites tests="12" disabled="0" errors="0" failures="2" time="301.5">
  <testsuite name="e2e suite" package="/e2e" tests="12" disabled="1" skipped="0" errors="0" failures="2" time="301.5">
    <testcase name="[Install] operators are available" time="2.0"></testcase>
  </testsuite>
</testsuites>"#;

    #[test]
    fn test_parse_ginkgo_report() {
        let summary = parse_junit_summary(GINKGO_REPORT).unwrap();
        assert_eq!(
            summary,
            TestSummary {
                tests: 12,
                failures: 2,
                errors: 0,
                skipped: 1,
            }
        );
    }

    #[test]
    fn test_parse_sums_multiple_suites() {
        let xml = r#"<testsuites>
<testsuite name="a" tests="3" failures="1" errors="0"/>
<testsuite name="b" tests="4" failures="0" errors="2" skipped="1"/>
</testsuites>"#;
        let summary = parse_junit_summary(xml).unwrap();
        assert_eq!(summary.tests, 7);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_parse_root_only() {
        let summary = parse_junit_summary(r#"<testsuites tests="5" failures="0"></testsuites>"#).unwrap();
        assert_eq!(summary.tests, 5);
    }

    #[test]
    fn test_parse_rejects_non_junit() {
        assert!(matches!(
            parse_junit_summary("<html></html>"),
            Err(RunnerError::Report(_))
        ));
    }

    fn request(dir: &Path) -> EngineRequest {
        EngineRequest {
            phase: Phase::Install,
            focus: Some("\\[Install\\]".to_string()),
            skip: None,
            report_path: dir.join("junit_abc.xml"),
            suffix: RunSuffix::parse("abc").unwrap(),
            credential: Some(SecretString::from("kc")),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandTestEngine::new("definitely-not-an-e2e-suite");
        let result = engine.execute(&request(dir.path())).await;
        assert!(matches!(result, Err(RunnerError::Engine(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_suite_without_report_counts_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandTestEngine::new("true");
        let summary = engine.execute(&request(dir.path())).await.unwrap();
        assert_eq!(summary.errors, 1);
        assert!(summary.has_failures());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_suite_report_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("suite.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n[ \"$E2E_PHASE\" = install ] || exit 3\n[ -f \"$KUBECONFIG\" ] || exit 4\ncat > \"$E2E_JUNIT_REPORT\" <<'EOF'\n{}\nEOF\nexit 1\n",
                GINKGO_REPORT
            ),
        )
        .unwrap();

        let engine = CommandTestEngine::new("sh").with_args([script.to_string_lossy()]);
        let summary = engine.execute(&request(dir.path())).await.unwrap();
        assert_eq!(summary.tests, 12);
        assert_eq!(summary.failures, 2);
    }
}
