//! Tracing subscriber setup for the runner binary.

use common::config::ObservabilityConfig;
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing setup failure.
#[derive(Debug, Error)]
pub enum TracingInitError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: ParseError,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Install the global tracing subscriber.
///
/// Logs go to stderr so the suite's own output on stdout stays readable.
///
/// # Errors
///
/// Returns `TracingInitError::InvalidFilter` if the filter does not parse,
/// or `AlreadyInstalled` if a global subscriber is already set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingInitError> {
    let filter =
        EnvFilter::try_new(&config.log_filter).map_err(|source| TracingInitError::InvalidFilter {
            filter: config.log_filter.clone(),
            source,
        })?;

    let json_layer = config
        .json_logs
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!config.json_logs).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;
    Ok(())
}
