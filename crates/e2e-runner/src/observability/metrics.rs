//! Run metrics in Prometheus text format.
//!
//! The runner is a batch job, so metrics are not scraped: they are rendered
//! once from the run metadata into a file that is uploaded to the metrics
//! bucket. A local recorder is used so nothing is installed globally and
//! concurrent runs in one process stay independent.
//!
//! All metrics use the `e2e_` prefix.
//!
//! # Cardinality
//!
//! - `phase`: 2 values (install, upgrade)
//! - `result`: 4 values (passed, failed, errored, skipped)
//! - `status`: 4 values (passed, failed, error, skipped)
//! - `severity`: 3 values (fatal, phase, non_fatal)

use crate::orchestrator::report::RunMetadata;
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Render metrics describing a finished run.
///
/// Metrics:
/// - `e2e_run_info{job, suffix, environment, mode, install_version, upgrade_version}` = 1
/// - `e2e_run_failed{job}` = 0 or 1
/// - `e2e_run_duration_seconds{job}`
/// - `e2e_run_errors{job, severity}`
/// - `e2e_phase_tests{job, phase, result}`
/// - `e2e_phase_status{job, phase, status}` = 1
pub fn render_run_metrics(metadata: &RunMetadata) -> String {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    let job = metadata
        .job_name
        .clone()
        .unwrap_or_else(|| "e2e-runner".to_string());

    metrics::with_local_recorder(&recorder, || {
        gauge!("e2e_run_info",
            "job" => job.clone(),
            "suffix" => metadata.suffix.clone(),
            "environment" => metadata.environment.clone(),
            "mode" => metadata.mode.as_str(),
            "install_version" => metadata.install_version.clone().unwrap_or_default(),
            "upgrade_version" => metadata
                .upgrade_target
                .as_ref()
                .map(|t| t.pull_spec().to_string())
                .unwrap_or_default()
        )
        .set(1.0);

        gauge!("e2e_run_failed", "job" => job.clone()).set(if metadata.failed { 1.0 } else { 0.0 });

        let duration = metadata
            .finished_at
            .signed_duration_since(metadata.started_at)
            .to_std()
            .unwrap_or_default();
        gauge!("e2e_run_duration_seconds", "job" => job.clone()).set(duration.as_secs_f64());

        for (severity, count) in [
            ("fatal", metadata.errors.fatal),
            ("phase", metadata.errors.phase),
            ("non_fatal", metadata.errors.non_fatal),
        ] {
            gauge!("e2e_run_errors", "job" => job.clone(), "severity" => severity)
                .set(f64::from(u32::try_from(count).unwrap_or(u32::MAX)));
        }

        for entry in &metadata.phases {
            let phase = entry.phase.as_str();

            gauge!("e2e_phase_status",
                "job" => job.clone(),
                "phase" => phase,
                "status" => entry.status.as_str()
            )
            .set(1.0);

            if let Some(summary) = &entry.summary {
                for (result, count) in [
                    ("passed", summary.passed()),
                    ("failed", summary.failures),
                    ("errored", summary.errors),
                    ("skipped", summary.skipped),
                ] {
                    gauge!("e2e_phase_tests",
                        "job" => job.clone(),
                        "phase" => phase,
                        "result" => result
                    )
                    .set(f64::from(count));
                }
            }
        }
    });

    handle.render()
}
