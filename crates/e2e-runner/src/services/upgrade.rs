//! Cluster upgrade driver.
//!
//! `ClusterVersionUpgrader` requests an upgrade by merge-patching the
//! cluster's `ClusterVersion` desired update and then waits for the newest
//! history entry to report the target image as completed.

use crate::errors::RunnerError;
use crate::eventual::{poll_until, PollPolicy, Probe};
use crate::models::UpgradeTarget;
use crate::services::kubeconfig::client_for;
use common::secret::SecretString;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// The singleton `ClusterVersion` every cluster carries.
const CLUSTER_VERSION_NAME: &str = "version";

/// Trait for cluster upgrades (enables mocking).
#[async_trait::async_trait]
pub trait UpgradeDriver: Send + Sync {
    /// Upgrade the cluster reachable with `credential` to `target`.
    ///
    /// Returns `RunnerError::UpgradeUnrecoverable` when the upgrade could not
    /// even be started; any other error leaves the cluster in a state worth
    /// testing.
    async fn upgrade(&self, credential: &SecretString, target: &UpgradeTarget)
        -> Result<(), RunnerError>;
}

#[derive(Debug, Default, Deserialize)]
struct ClusterVersionStatus {
    #[serde(default)]
    history: Vec<UpdateHistory>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct UpdateHistory {
    state: String,
    #[serde(default)]
    image: String,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default)]
    message: String,
}

/// `ClusterVersion` objects, which are cluster scoped.
fn cluster_versions(client: Client) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion");
    Api::all_with(client, &ApiResource::from_gvk_with_plural(&gvk, "clusterversions"))
}

/// How far the upgrade to `pull_spec` has got, from the `ClusterVersion` status.
fn upgrade_progress(object: &DynamicObject, pull_spec: &str) -> Result<Probe<()>, RunnerError> {
    let status: ClusterVersionStatus = match object.data.get("status") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| RunnerError::Upgrade(format!("unreadable clusterversion status: {}", e)))?,
        None => ClusterVersionStatus::default(),
    };

    let completed = status
        .history
        .first()
        .is_some_and(|latest| latest.image == pull_spec && latest.state == "Completed");
    if completed {
        return Ok(Probe::Ready(()));
    }

    let failing = status
        .conditions
        .iter()
        .find(|c| c.kind == "Failing" && c.status == "True");
    if let Some(condition) = failing {
        return Err(RunnerError::Upgrade(format!(
            "cluster reports upgrade failing: {}",
            condition.message
        )));
    }

    Ok(Probe::Pending)
}

/// `UpgradeDriver` that drives the in-cluster version operator.
pub struct ClusterVersionUpgrader {
    completion_timeout: Duration,
}

impl ClusterVersionUpgrader {
    pub fn new(completion_timeout: Duration) -> Self {
        Self { completion_timeout }
    }
}

#[async_trait::async_trait]
impl UpgradeDriver for ClusterVersionUpgrader {
    #[instrument(skip_all, fields(upgrade_target = %target))]
    async fn upgrade(
        &self,
        credential: &SecretString,
        target: &UpgradeTarget,
    ) -> Result<(), RunnerError> {
        let client = client_for(credential)
            .await
            .map_err(|e| RunnerError::UpgradeUnrecoverable(e.to_string()))?;
        let versions = cluster_versions(client);

        let patch = serde_json::json!({
            "spec": {
                "desiredUpdate": {
                    "image": target.pull_spec(),
                    "force": true
                }
            }
        });

        versions
            .patch(CLUSTER_VERSION_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| RunnerError::UpgradeUnrecoverable(format!("upgrade request rejected: {}", e)))?;

        info!(target: "e2e.services.upgrade", "Upgrade requested, waiting for completion");

        let pull_spec = target.pull_spec();
        poll_until(
            "cluster upgrade to complete",
            PollPolicy::with_timeout(self.completion_timeout),
            || async {
                match versions.get(CLUSTER_VERSION_NAME).await {
                    Ok(object) => upgrade_progress(&object, pull_spec),
                    Err(e) => {
                        // The API server restarts during upgrades.
                        warn!(target: "e2e.services.upgrade", error = %e, "Upgrade status check failed");
                        Ok(Probe::Pending)
                    }
                }
            },
        )
        .await?;

        info!(target: "e2e.services.upgrade", "Upgrade completed");
        Ok(())
    }
}

/// Mock upgrade driver module for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Scripted upgrade result.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum UpgradeBehavior {
        Succeed,
        /// Upgrade started but did not finish cleanly.
        Fail,
        /// Upgrade could not be started.
        FailUnrecoverable,
        Hang,
    }

    /// Mock upgrade driver recording requested targets.
    pub struct MockUpgradeDriver {
        behavior: UpgradeBehavior,
        calls: AtomicUsize,
        targets: Mutex<Vec<UpgradeTarget>>,
    }

    impl MockUpgradeDriver {
        pub fn new(behavior: UpgradeBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
                targets: Mutex::new(Vec::new()),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(UpgradeBehavior::Succeed)
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn targets(&self) -> Vec<UpgradeTarget> {
            self.targets
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait::async_trait]
    impl UpgradeDriver for MockUpgradeDriver {
        async fn upgrade(
            &self,
            _credential: &SecretString,
            target: &UpgradeTarget,
        ) -> Result<(), RunnerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(target.clone());

            match self.behavior {
                UpgradeBehavior::Succeed => Ok(()),
                UpgradeBehavior::Fail => Err(RunnerError::Upgrade(
                    "mock: operators degraded after upgrade".to_string(),
                )),
                UpgradeBehavior::FailUnrecoverable => Err(RunnerError::UpgradeUnrecoverable(
                    "mock: upgrade request rejected".to_string(),
                )),
                UpgradeBehavior::Hang => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::kubeconfig::test_kubeconfig;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const IMAGE: &str = "quay.io/release:4.13.2";
    const CLUSTER_VERSION_PATH: &str = "/apis/config.openshift.io/v1/clusterversions/version";

    fn cluster_version(history: serde_json::Value, conditions: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterVersion",
            "metadata": {"name": "version"},
            "status": {"history": history, "conditions": conditions}
        })
    }

    fn object(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn image_target() -> UpgradeTarget {
        UpgradeTarget::Image {
            pull_spec: IMAGE.to_string(),
        }
    }

    #[test]
    fn test_progress_completed() {
        let cv = object(cluster_version(
            serde_json::json!([
                {"state": "Completed", "image": IMAGE},
                {"state": "Completed", "image": "quay.io/release:4.12.3"}
            ]),
            serde_json::json!([]),
        ));
        assert_eq!(upgrade_progress(&cv, IMAGE).unwrap(), Probe::Ready(()));
    }

    #[test]
    fn test_progress_partial_is_pending() {
        let cv = object(cluster_version(
            serde_json::json!([{"state": "Partial", "image": IMAGE}]),
            serde_json::json!([{"type": "Failing", "status": "False"}]),
        ));
        assert_eq!(upgrade_progress(&cv, IMAGE).unwrap(), Probe::Pending);
    }

    #[test]
    fn test_progress_previous_image_is_pending() {
        let cv = object(cluster_version(
            serde_json::json!([{"state": "Completed", "image": "quay.io/release:4.12.3"}]),
            serde_json::json!([]),
        ));
        assert_eq!(upgrade_progress(&cv, IMAGE).unwrap(), Probe::Pending);
    }

    #[test]
    fn test_progress_failing_condition_is_error() {
        let cv = object(cluster_version(
            serde_json::json!([{"state": "Partial", "image": IMAGE}]),
            serde_json::json!([{"type": "Failing", "status": "True", "message": "etcd degraded"}]),
        ));
        let err = upgrade_progress(&cv, IMAGE).unwrap_err();
        assert!(matches!(err, RunnerError::Upgrade(msg) if msg.contains("etcd degraded")));
    }

    #[test]
    fn test_progress_missing_status_is_pending() {
        let cv = object(serde_json::json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterVersion",
            "metadata": {"name": "version"}
        }));
        assert_eq!(upgrade_progress(&cv, IMAGE).unwrap(), Probe::Pending);
    }

    #[tokio::test]
    async fn test_upgrade_patches_desired_update_and_waits() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(CLUSTER_VERSION_PATH))
            .and(header("Content-Type", "application/merge-patch+json"))
            .and(body_partial_json(serde_json::json!({
                "spec": {"desiredUpdate": {"image": IMAGE, "force": true}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(cluster_version(
                serde_json::json!([]),
                serde_json::json!([]),
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CLUSTER_VERSION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(cluster_version(
                serde_json::json!([{"state": "Completed", "image": IMAGE}]),
                serde_json::json!([]),
            )))
            .mount(&server)
            .await;

        let upgrader = ClusterVersionUpgrader::new(Duration::from_secs(5));
        upgrader
            .upgrade(&test_kubeconfig(&server.uri()), &image_target())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_patch_is_unrecoverable() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "apiVersion": "v1",
                "kind": "Status",
                "metadata": {},
                "status": "Failure",
                "message": "forbidden",
                "reason": "Forbidden",
                "code": 403
            })))
            .mount(&server)
            .await;

        let upgrader = ClusterVersionUpgrader::new(Duration::from_secs(1));
        let result = upgrader
            .upgrade(&test_kubeconfig(&server.uri()), &image_target())
            .await;
        assert!(matches!(result, Err(RunnerError::UpgradeUnrecoverable(_))));
    }

    #[tokio::test]
    async fn test_unusable_credential_is_unrecoverable() {
        let upgrader = ClusterVersionUpgrader::new(Duration::from_secs(1));
        let result = upgrader
            .upgrade(&SecretString::from("not a kubeconfig: ["), &image_target())
            .await;
        assert!(matches!(result, Err(RunnerError::UpgradeUnrecoverable(_))));
    }
}
