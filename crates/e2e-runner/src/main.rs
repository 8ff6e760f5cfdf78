//! E2E Runner
//!
//! Entry point for one end-to-end validation run. Reads its configuration
//! from the environment, drives the run to completion and reports the
//! outcome through the exit code:
//!
//! - `0` - the run passed
//! - `1` - the run failed (including test failures)
//! - `2` - the run could not start (invalid configuration)

use common::config::ObservabilityConfig;
use e2e_runner::observability::tracing_init::init_tracing;
use e2e_runner::{Collaborators, Config, TestOrchestrator};
use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use tracing::{error, info};

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let vars: HashMap<String, String> = env::vars().collect();

    let observability = match ObservabilityConfig::from_vars(&vars) {
        Ok(observability) => observability,
        Err(e) => {
            eprintln!("Invalid logging configuration: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Err(e) = init_tracing(&observability) {
        eprintln!("{}", e);
        return ExitCode::from(EXIT_CONFIG);
    }

    info!(target: "e2e.main", "Starting e2e runner");

    let config = match Config::from_vars(&vars) {
        Ok(config) => config,
        Err(e) => {
            error!(target: "e2e.main", error = %e, "Failed to load configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    info!(
        target: "e2e.main",
        suffix = %config.suffix,
        mode = %config.mode(),
        environment = %config.environment,
        report_dir = %config.report_dir.display(),
        "Configuration loaded successfully"
    );

    let collaborators = match Collaborators::from_config(&config) {
        Ok(collaborators) => collaborators,
        Err(e) => {
            error!(target: "e2e.main", error = %e, "Failed to initialize clients");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let result = TestOrchestrator::new(collaborators).run(&config).await;

    if result.failed {
        ExitCode::from(EXIT_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}
