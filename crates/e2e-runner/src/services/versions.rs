//! Install and upgrade version selection.
//!
//! Install versions come from the provider's version listing. Upgrade
//! targets are either an explicit release image or a release looked up in a
//! release stream on the release controller; the explicit image wins when
//! both are configured.

use crate::config::Config;
use crate::errors::RunnerError;
use crate::models::UpgradeTarget;
use crate::services::ocm::OcmApi;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const VERSIONS_PATH: &str = "/api/clusters_mgmt/v1/versions?size=500";

/// Trait for version selection (enables mocking).
#[async_trait::async_trait]
pub trait VersionSelector: Send + Sync {
    /// Provider version id to install.
    async fn select_install_version(&self, config: &Config) -> Result<String, RunnerError>;

    /// Upgrade target, or `None` when no upgrade is configured.
    async fn select_upgrade_target(
        &self,
        config: &Config,
    ) -> Result<Option<UpgradeTarget>, RunnerError>;
}

/// One installable version as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AvailableVersion {
    /// Provider id, e.g. `openshift-v4.12.3`.
    pub id: String,
    /// Plain version, e.g. `4.12.3`.
    pub raw_id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub default: bool,
}

/// A release published in a release stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub pull_spec: String,
}

/// Source of installable versions.
#[async_trait::async_trait]
pub trait VersionSource: Send + Sync {
    async fn available_versions(&self) -> Result<Vec<AvailableVersion>, RunnerError>;
}

/// Source of releases by stream.
#[async_trait::async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Latest accepted release in `stream`.
    async fn latest(&self, stream: &str) -> Result<Release, RunnerError>;

    /// A named release in `stream`.
    async fn release(&self, stream: &str, name: &str) -> Result<Release, RunnerError>;
}

/// Parsed `major.minor.patch[-pre]` version.
///
/// Pre-releases sort before the release they precede.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl ClusterVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_start_matches('v');
        let (core, pre) = match raw.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (raw, None),
        };

        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

impl Ord for ClusterVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for ClusterVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// `VersionSource` backed by the provisioning API.
pub struct OcmVersionSource {
    api: OcmApi,
}

impl OcmVersionSource {
    pub fn new(api: OcmApi) -> Self {
        Self { api }
    }
}

#[derive(Debug, Deserialize)]
struct VersionList {
    #[serde(default)]
    items: Vec<AvailableVersion>,
}

#[async_trait::async_trait]
impl VersionSource for OcmVersionSource {
    async fn available_versions(&self) -> Result<Vec<AvailableVersion>, RunnerError> {
        let list: VersionList = self
            .api
            .get_json(VERSIONS_PATH)
            .await
            .map_err(|e| RunnerError::VersionSelection(e.to_string()))?;
        Ok(list.items)
    }
}

/// `ReleaseSource` backed by the release controller HTTP API.
pub struct ReleaseControllerClient {
    client: Client,
    base_url: String,
}

impl ReleaseControllerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RunnerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                RunnerError::VersionSelection(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, path: &str) -> Result<Release, RunnerError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(target: "e2e.services.versions", error = %e, url = %url, "Release controller request failed");
            RunnerError::VersionSelection(format!("request to {} failed: {}", url, e))
        })?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(|e| {
                RunnerError::VersionSelection(format!("invalid release from {}: {}", url, e))
            }),
            StatusCode::NOT_FOUND => Err(RunnerError::VersionSelection(format!(
                "release not found at {}",
                url
            ))),
            status => Err(RunnerError::VersionSelection(format!(
                "{} returned {}",
                url, status
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ReleaseSource for ReleaseControllerClient {
    async fn latest(&self, stream: &str) -> Result<Release, RunnerError> {
        self.fetch(&format!("/api/v1/releasestream/{}/latest", stream))
            .await
    }

    async fn release(&self, stream: &str, name: &str) -> Result<Release, RunnerError> {
        self.fetch(&format!("/api/v1/releasestream/{}/release/{}", stream, name))
            .await
    }
}

/// Default selection policy.
///
/// Install: explicit version, else the newest enabled release matching the
/// major/minor targets, else the provider default.
/// Upgrade: explicit image, else a release from the configured stream.
pub struct DefaultVersionSelector {
    versions: Arc<dyn VersionSource>,
    releases: Arc<dyn ReleaseSource>,
}

impl DefaultVersionSelector {
    pub fn new(versions: Arc<dyn VersionSource>, releases: Arc<dyn ReleaseSource>) -> Self {
        Self { versions, releases }
    }

    fn pick(
        available: &[AvailableVersion],
        major: Option<u64>,
        minor: Option<u64>,
    ) -> Option<&AvailableVersion> {
        if major.is_none() && minor.is_none() {
            return available.iter().find(|v| v.enabled && v.default);
        }

        available
            .iter()
            .filter(|v| v.enabled)
            .filter_map(|v| ClusterVersion::parse(&v.raw_id).map(|parsed| (parsed, v)))
            .filter(|(parsed, _)| !parsed.is_prerelease())
            .filter(|(parsed, _)| major.map_or(true, |m| parsed.major == m))
            .filter(|(parsed, _)| minor.map_or(true, |m| parsed.minor == m))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, v)| v)
    }
}

#[async_trait::async_trait]
impl VersionSelector for DefaultVersionSelector {
    #[instrument(skip_all)]
    async fn select_install_version(&self, config: &Config) -> Result<String, RunnerError> {
        if let Some(version) = &config.cluster_version {
            info!(target: "e2e.services.versions", version = %version, "Using explicit install version");
            return Ok(version.clone());
        }

        let available = self.versions.available_versions().await?;
        let chosen = Self::pick(&available, config.major_target, config.minor_target)
            .ok_or_else(|| {
                RunnerError::VersionSelection(format!(
                    "no enabled version matches major={:?} minor={:?} ({} versions listed)",
                    config.major_target,
                    config.minor_target,
                    available.len()
                ))
            })?;

        info!(target: "e2e.services.versions", version = %chosen.id, "Selected install version");
        Ok(chosen.id.clone())
    }

    #[instrument(skip_all)]
    async fn select_upgrade_target(
        &self,
        config: &Config,
    ) -> Result<Option<UpgradeTarget>, RunnerError> {
        if let Some(image) = &config.upgrade_image {
            return Ok(Some(UpgradeTarget::Image {
                pull_spec: image.clone(),
            }));
        }

        let Some(stream) = &config.upgrade_release_stream else {
            return Ok(None);
        };

        let release = match &config.upgrade_release_name {
            Some(name) => self.releases.release(stream, name).await?,
            None => self.releases.latest(stream).await?,
        };

        info!(
            target: "e2e.services.versions",
            stream = %stream,
            release = %release.name,
            "Selected upgrade release"
        );

        Ok(Some(UpgradeTarget::Release {
            stream: stream.clone(),
            name: release.name,
            pull_spec: release.pull_spec,
        }))
    }
}

/// Mock version selector module for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock version selector with fixed answers.
    pub struct MockVersionSelector {
        install: Option<String>,
        upgrade: Option<UpgradeTarget>,
        fail_install: bool,
        fail_upgrade: bool,
        hang: bool,
        install_calls: AtomicUsize,
        upgrade_calls: AtomicUsize,
    }

    impl Default for MockVersionSelector {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockVersionSelector {
        /// Selects `4.12.3` for install and no upgrade target.
        pub fn new() -> Self {
            Self {
                install: Some("openshift-v4.12.3".to_string()),
                upgrade: None,
                fail_install: false,
                fail_upgrade: false,
                hang: false,
                install_calls: AtomicUsize::new(0),
                upgrade_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_upgrade(mut self, target: UpgradeTarget) -> Self {
            self.upgrade = Some(target);
            self
        }

        pub fn failing_install(mut self) -> Self {
            self.fail_install = true;
            self
        }

        pub fn failing_upgrade(mut self) -> Self {
            self.fail_upgrade = true;
            self
        }

        /// Never answer.
        pub fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }

        pub fn install_calls(&self) -> usize {
            self.install_calls.load(Ordering::SeqCst)
        }

        pub fn upgrade_calls(&self) -> usize {
            self.upgrade_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl VersionSelector for MockVersionSelector {
        async fn select_install_version(&self, _config: &Config) -> Result<String, RunnerError> {
            self.install_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_install {
                return Err(RunnerError::VersionSelection(
                    "mock: no version available".to_string(),
                ));
            }
            self.install
                .clone()
                .ok_or_else(|| RunnerError::VersionSelection("mock: no version".to_string()))
        }

        async fn select_upgrade_target(
            &self,
            _config: &Config,
        ) -> Result<Option<UpgradeTarget>, RunnerError> {
            self.upgrade_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_upgrade {
                return Err(RunnerError::VersionSelection(
                    "mock: release stream unavailable".to_string(),
                ));
            }
            Ok(self.upgrade.clone())
        }
    }
}
