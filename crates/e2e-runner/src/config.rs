//! Run configuration.
//!
//! Configuration is loaded once from environment variables at run start and
//! is read-only afterwards. Defaults that depend on the run suffix (report
//! directory, cluster name) are filled at load time so that every consumer
//! sees the same values. Credentials are held as `SecretString` and are
//! redacted in Debug output.

use crate::models::ClusterMode;
use common::error::CommonError;
use common::secret::SecretString;
use common::types::{ClusterId, RunSuffix};
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default provisioning environment.
pub const DEFAULT_ENVIRONMENT: &str = "prod";

/// Default provider-side cluster expiry in minutes.
pub const DEFAULT_CLUSTER_EXPIRY_MINUTES: u64 = 210;

/// Default bound on cluster provisioning in minutes.
pub const DEFAULT_CLUSTER_UP_TIMEOUT_MINUTES: u64 = 135;

/// Default bound on single provider API calls in seconds.
pub const DEFAULT_API_TIMEOUT_SECONDS: u64 = 60;

/// Default bound on one test phase in minutes.
pub const DEFAULT_PHASE_TIMEOUT_MINUTES: u64 = 180;

/// Default bound on the upgrade operation in minutes.
pub const DEFAULT_UPGRADE_TIMEOUT_MINUTES: u64 = 90;

/// Default test suite binary.
pub const DEFAULT_SUITE_COMMAND: &str = "e2e-suite";

/// Default metrics bucket.
pub const DEFAULT_METRICS_BUCKET: &str = "e2e-metrics";

/// Default release controller used for release stream lookups.
pub const DEFAULT_RELEASE_CONTROLLER_URL: &str =
    "https://openshift-release.apps.ci.l2s4.p1.openshiftapps.com";

/// Run configuration.
///
/// If `kubeconfig` is present the run is in attached mode and the cluster
/// manager is never consulted; otherwise the runner owns the cluster.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for JUnit reports, metadata and metrics.
    pub report_dir: PathBuf,

    /// Disambiguates concurrent runs (generated when unset).
    pub suffix: RunSuffix,

    /// Run all the way up to version selection, then skip the tests.
    pub dry_run: bool,

    /// Name of the CI job driving this run.
    pub job_name: Option<String>,

    /// Provisioning API token (required in owned mode).
    pub provider_token: Option<SecretString>,

    /// Provisioning environment (`prod`, `stage`, `int`).
    pub environment: String,

    /// Base URL of the provisioning API.
    pub provider_url: String,

    /// Existing owned cluster to test instead of provisioning one.
    pub cluster_id: Option<ClusterId>,

    /// Name used when provisioning.
    pub cluster_name: String,

    /// Explicit install version.
    pub cluster_version: Option<String>,

    /// Major version to target during version selection.
    pub major_target: Option<u64>,

    /// Minor version to target during version selection.
    pub minor_target: Option<u64>,

    /// Deploy across multiple availability zones.
    pub multi_az: bool,

    /// Provider-side expiry of provisioned clusters, in minutes.
    pub cluster_expiry_minutes: u64,

    /// Bound on provisioning (create + wait for ready).
    pub cluster_up_timeout: Duration,

    /// Bound on single provider calls: quota check, version lookup, delete.
    pub api_timeout: Duration,

    /// Bound on one test phase.
    pub phase_timeout: Duration,

    /// Bound on the upgrade operation.
    pub upgrade_timeout: Duration,

    /// Delete an owned cluster once the run completes.
    pub destroy_cluster_after_test: bool,

    /// Externally supplied cluster access credential (attached mode).
    pub kubeconfig: Option<SecretString>,

    /// Release image to upgrade to. Takes precedence over the release stream.
    pub upgrade_image: Option<String>,

    /// Release stream to pick the upgrade release from.
    pub upgrade_release_stream: Option<String>,

    /// Specific release in `upgrade_release_stream` (latest when unset).
    pub upgrade_release_name: Option<String>,

    /// Release controller base URL.
    pub release_controller_url: String,

    /// Regex selecting tests to run.
    pub test_focus: Option<String>,

    /// Regex selecting tests to skip.
    pub test_skip: Option<String>,

    /// Test suite binary executed for each phase.
    pub suite_command: String,

    /// Upload the metrics artifact after the run.
    pub upload_metrics: bool,

    /// Bucket receiving the metrics artifact.
    pub metrics_bucket: String,

    /// S3-compatible endpoint overriding the shared AWS configuration.
    pub metrics_endpoint: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid boolean value: {0}")]
    InvalidBool(String),

    #[error("Invalid numeric value: {0}")]
    InvalidNumber(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let suffix = match optional(vars, "SUFFIX") {
            Some(value) => RunSuffix::parse(&value)?,
            None => RunSuffix::generate(),
        };

        let report_dir = optional(vars, "REPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join(format!("e2e-runner-{suffix}")));

        let kubeconfig = optional(vars, "TEST_KUBECONFIG").map(SecretString::from);
        let provider_token = optional(vars, "OCM_TOKEN").map(SecretString::from);

        // Owned mode drives the provisioning API and cannot run without a token.
        if kubeconfig.is_none() && provider_token.is_none() {
            return Err(ConfigError::MissingEnvVar("OCM_TOKEN".to_string()));
        }

        let environment =
            optional(vars, "OSD_ENV").unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let provider_url = match optional(vars, "PROVIDER_URL") {
            Some(url) => url,
            None => provider_url_for(&environment)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "OSD_ENV must be one of prod, stage, int (or set PROVIDER_URL), got '{}'",
                        environment
                    ))
                })?
                .to_string(),
        };

        let cluster_id = optional(vars, "CLUSTER_ID")
            .map(ClusterId::new)
            .transpose()?;

        let cluster_name =
            optional(vars, "CLUSTER_NAME").unwrap_or_else(|| format!("e2e-{suffix}"));

        let upgrade_release_stream = optional(vars, "UPGRADE_RELEASE_STREAM");
        let upgrade_release_name = optional(vars, "UPGRADE_RELEASE_NAME");
        if upgrade_release_name.is_some() && upgrade_release_stream.is_none() {
            return Err(ConfigError::Invalid(
                "UPGRADE_RELEASE_NAME requires UPGRADE_RELEASE_STREAM".to_string(),
            ));
        }

        let test_focus = optional_regex(vars, "TEST_FOCUS")?;
        let test_skip = optional_regex(vars, "TEST_SKIP")?;

        Ok(Config {
            report_dir,
            suffix,
            dry_run: parse_bool(vars, "DRY_RUN", false)?,
            job_name: optional(vars, "JOB_NAME"),
            provider_token,
            environment,
            provider_url,
            cluster_id,
            cluster_name,
            cluster_version: optional(vars, "CLUSTER_VERSION"),
            major_target: parse_optional_u64(vars, "MAJOR_TARGET")?,
            minor_target: parse_optional_u64(vars, "MINOR_TARGET")?,
            multi_az: parse_bool(vars, "MULTI_AZ", false)?,
            cluster_expiry_minutes: parse_positive(
                vars,
                "CLUSTER_EXPIRY_IN_MINUTES",
                DEFAULT_CLUSTER_EXPIRY_MINUTES,
            )?,
            cluster_up_timeout: minutes(parse_positive(
                vars,
                "CLUSTER_UP_TIMEOUT",
                DEFAULT_CLUSTER_UP_TIMEOUT_MINUTES,
            )?),
            api_timeout: Duration::from_secs(parse_positive(
                vars,
                "API_TIMEOUT_SECONDS",
                DEFAULT_API_TIMEOUT_SECONDS,
            )?),
            phase_timeout: minutes(parse_positive(
                vars,
                "PHASE_TIMEOUT",
                DEFAULT_PHASE_TIMEOUT_MINUTES,
            )?),
            upgrade_timeout: minutes(parse_positive(
                vars,
                "UPGRADE_TIMEOUT",
                DEFAULT_UPGRADE_TIMEOUT_MINUTES,
            )?),
            destroy_cluster_after_test: parse_bool(vars, "DESTROY_CLUSTER", true)?,
            kubeconfig,
            upgrade_image: optional(vars, "UPGRADE_IMAGE"),
            upgrade_release_stream,
            upgrade_release_name,
            release_controller_url: optional(vars, "RELEASE_CONTROLLER_URL")
                .unwrap_or_else(|| DEFAULT_RELEASE_CONTROLLER_URL.to_string()),
            test_focus,
            test_skip,
            suite_command: optional(vars, "TEST_SUITE_COMMAND")
                .unwrap_or_else(|| DEFAULT_SUITE_COMMAND.to_string()),
            upload_metrics: parse_bool(vars, "UPLOAD_METRICS", false)?,
            metrics_bucket: optional(vars, "METRICS_BUCKET")
                .unwrap_or_else(|| DEFAULT_METRICS_BUCKET.to_string()),
            metrics_endpoint: optional(vars, "METRICS_ENDPOINT"),
        })
    }

    /// Whether the runner owns the cluster lifecycle.
    pub fn mode(&self) -> ClusterMode {
        if self.kubeconfig.is_some() {
            ClusterMode::Attached
        } else {
            ClusterMode::Owned
        }
    }

    /// Whether an upgrade target (image or release stream) is configured.
    pub fn upgrade_configured(&self) -> bool {
        self.upgrade_image.is_some() || self.upgrade_release_stream.is_some()
    }
}

/// Provisioning API base URL for a named environment.
pub fn provider_url_for(environment: &str) -> Option<&'static str> {
    match environment {
        "prod" => Some("https://api.openshift.com"),
        "stage" => Some("https://api.stage.openshift.com"),
        "int" => Some("https://api.integration.openshift.com"),
        _ => None,
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

/// Trimmed value, treating empty strings as unset.
fn optional(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional_regex(vars: &HashMap<String, String>, key: &str) -> Result<Option<String>, ConfigError> {
    match optional(vars, key) {
        Some(pattern) => {
            Regex::new(&pattern).map_err(|e| {
                ConfigError::InvalidRegex(format!("{} is not a valid regex '{}': {}", key, pattern, e))
            })?;
            Ok(Some(pattern))
        }
        None => Ok(None),
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(vars, key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidBool(format!(
            "{} must be true/false/1/0, got '{}'",
            key, v
        ))),
    }
}

fn parse_optional_u64(vars: &HashMap<String, String>, key: &str) -> Result<Option<u64>, ConfigError> {
    optional(vars, key)
        .map(|value| {
            value.parse::<u64>().map_err(|e| {
                ConfigError::InvalidNumber(format!(
                    "{} must be a valid non-negative integer, got '{}': {}",
                    key, value, e
                ))
            })
        })
        .transpose()
}

fn parse_positive(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match parse_optional_u64(vars, key)? {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidNumber(format!(
            "{} must be greater than 0",
            key
        ))),
        Some(value) => Ok(value),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn owned_vars() -> HashMap<String, String> {
        HashMap::from([("OCM_TOKEN".to_string(), "token-value".to_string())])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&owned_vars()).expect("Config should load successfully");

        assert_eq!(config.mode(), ClusterMode::Owned);
        assert_eq!(config.environment, "prod");
        assert_eq!(config.provider_url, "https://api.openshift.com");
        assert_eq!(config.suffix.as_str().len(), 3);
        assert_eq!(config.cluster_name, format!("e2e-{}", config.suffix));
        assert!(config
            .report_dir
            .ends_with(format!("e2e-runner-{}", config.suffix)));
        assert!(!config.dry_run);
        assert!(config.destroy_cluster_after_test);
        assert!(!config.upload_metrics);
        assert_eq!(config.metrics_bucket, DEFAULT_METRICS_BUCKET);
        assert!(config.metrics_endpoint.is_none());
        assert_eq!(config.suite_command, DEFAULT_SUITE_COMMAND);
        assert_eq!(
            config.cluster_up_timeout,
            Duration::from_secs(DEFAULT_CLUSTER_UP_TIMEOUT_MINUTES * 60)
        );
        assert_eq!(config.api_timeout, Duration::from_secs(60));
        assert!(!config.upgrade_configured());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = owned_vars();
        vars.insert("SUFFIX".to_string(), "abc".to_string());
        vars.insert("REPORT_DIR".to_string(), "/tmp/x".to_string());
        vars.insert("DRY_RUN".to_string(), "true".to_string());
        vars.insert("OSD_ENV".to_string(), "stage".to_string());
        vars.insert("CLUSTER_ID".to_string(), "1a2b3c".to_string());
        vars.insert("CLUSTER_NAME".to_string(), "my-cluster".to_string());
        vars.insert("MAJOR_TARGET".to_string(), "4".to_string());
        vars.insert("MINOR_TARGET".to_string(), "12".to_string());
        vars.insert("DESTROY_CLUSTER".to_string(), "0".to_string());
        vars.insert("UPGRADE_RELEASE_STREAM".to_string(), "4-stable".to_string());
        vars.insert("TEST_FOCUS".to_string(), "\\[Install\\]".to_string());
        vars.insert("UPLOAD_METRICS".to_string(), "1".to_string());
        vars.insert("METRICS_ENDPOINT".to_string(), "http://minio:9000".to_string());
        vars.insert("PHASE_TIMEOUT".to_string(), "5".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.metrics_endpoint.as_deref(), Some("http://minio:9000"));

        assert_eq!(config.suffix.as_str(), "abc");
        assert_eq!(config.report_dir, PathBuf::from("/tmp/x"));
        assert!(config.dry_run);
        assert_eq!(config.provider_url, "https://api.stage.openshift.com");
        assert_eq!(config.cluster_id.as_ref().map(ClusterId::as_str), Some("1a2b3c"));
        assert_eq!(config.cluster_name, "my-cluster");
        assert_eq!(config.major_target, Some(4));
        assert_eq!(config.minor_target, Some(12));
        assert!(!config.destroy_cluster_after_test);
        assert!(config.upgrade_configured());
        assert_eq!(config.test_focus.as_deref(), Some("\\[Install\\]"));
        assert!(config.upload_metrics);
        assert_eq!(config.phase_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_attached_mode_does_not_require_token() {
        let vars = HashMap::from([(
            "TEST_KUBECONFIG".to_string(),
            "apiVersion: v1".to_string(),
        )]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.mode(), ClusterMode::Attached);
        assert_eq!(
            config.kubeconfig.as_ref().map(|k| k.expose_secret().to_string()),
            Some("apiVersion: v1".to_string())
        );
    }

    #[test]
    fn test_owned_mode_requires_token() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "OCM_TOKEN"));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let mut vars = owned_vars();
        vars.insert("CLUSTER_ID".to_string(), "   ".to_string());
        vars.insert("UPGRADE_IMAGE".to_string(), String::new());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert!(config.cluster_id.is_none());
        assert!(config.upgrade_image.is_none());
    }

    #[test]
    fn test_invalid_suffix_rejected() {
        let mut vars = owned_vars();
        vars.insert("SUFFIX".to_string(), "../etc".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::Common(CommonError::InvalidSuffix(_)))
        ));
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let mut vars = owned_vars();
        vars.insert("OSD_ENV".to_string(), "moon".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("moon")));
    }

    #[test]
    fn test_provider_url_override_allows_custom_environment() {
        let mut vars = owned_vars();
        vars.insert("OSD_ENV".to_string(), "local".to_string());
        vars.insert("PROVIDER_URL".to_string(), "http://127.0.0.1:9000".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.provider_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_release_name_requires_stream() {
        let mut vars = owned_vars();
        vars.insert("UPGRADE_RELEASE_NAME".to_string(), "4.12.3".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("UPGRADE_RELEASE_STREAM"))
        );
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut vars = owned_vars();
        vars.insert("DRY_RUN".to_string(), "yes please".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidBool(msg)) if msg.contains("DRY_RUN")));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut vars = owned_vars();
        vars.insert("CLUSTER_UP_TIMEOUT".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidNumber(msg)) if msg.contains("greater than 0"))
        );
    }

    #[test]
    fn test_non_numeric_target_rejected() {
        let mut vars = owned_vars();
        vars.insert("MAJOR_TARGET".to_string(), "four".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidNumber(msg)) if msg.contains("MAJOR_TARGET"))
        );
    }

    #[test]
    fn test_invalid_focus_regex_rejected() {
        let mut vars = owned_vars();
        vars.insert("TEST_FOCUS".to_string(), "[unclosed".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidRegex(msg)) if msg.contains("TEST_FOCUS")));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let mut vars = owned_vars();
        vars.insert("TEST_KUBECONFIG".to_string(), "super-secret-kubeconfig".to_string());
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{:?}", config);

        assert!(debug_output.contains("REDACTED"));
        assert!(!debug_output.contains("token-value"));
        assert!(!debug_output.contains("super-secret-kubeconfig"));
    }
}
