//! Cluster lifecycle management.
//!
//! `ClusterManager` is the seam the orchestrator uses to create, reuse and
//! delete clusters and to check quota. `OcmClusterManager` implements it
//! against the provisioning REST API.

use crate::errors::RunnerError;
use crate::eventual::{poll_until, PollPolicy, Probe};
use crate::models::{ClusterHandle, ProvisionSpec};
use crate::services::ocm::OcmApi;
use chrono::Utc;
use common::secret::SecretString;
use common::types::ClusterId;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

const CLUSTERS_PATH: &str = "/api/clusters_mgmt/v1/clusters";
const CURRENT_ACCOUNT_PATH: &str = "/api/accounts_mgmt/v1/current_account";

/// Trait for cluster lifecycle operations (enables mocking).
#[async_trait::async_trait]
pub trait ClusterManager: Send + Sync {
    /// Whether enough quota exists to provision a cluster matching `spec`.
    ///
    /// `Ok(false)` is a definitive answer; `Err` means the check could not
    /// be performed.
    async fn check_quota(&self, spec: &ProvisionSpec) -> Result<bool, RunnerError>;

    /// Request a new cluster and return its id as soon as it exists.
    ///
    /// `Err` means no cluster was created.
    async fn create(&self, spec: &ProvisionSpec) -> Result<ClusterId, RunnerError>;

    /// Wait for a created cluster to become ready and fetch its credential.
    ///
    /// The caller owns `id` from the moment `create` returned it, so this
    /// may be cancelled at any point without leaking the cluster.
    async fn wait_ready(&self, id: &ClusterId, spec: &ProvisionSpec) -> Result<ClusterHandle, RunnerError>;

    /// Bind to an existing cluster by id and fetch its credential.
    async fn attach(&self, id: &ClusterId) -> Result<ClusterHandle, RunnerError>;

    /// Delete a cluster. Deleting an already deleted cluster succeeds.
    async fn delete(&self, id: &ClusterId) -> Result<(), RunnerError>;
}

/// Cluster state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Pending,
    Validating,
    Waiting,
    Installing,
    Ready,
    Error,
    Uninstalling,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
struct CreateClusterRequest<'a> {
    name: &'a str,
    managed: bool,
    multi_az: bool,
    expiration_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<VersionRef<'a>>,
}

#[derive(Debug, Serialize)]
struct VersionRef<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClusterResponse {
    id: String,
    #[serde(default)]
    name: String,
    state: ClusterState,
}

#[derive(Debug, Deserialize)]
struct CredentialsResponse {
    kubeconfig: SecretString,
}

#[derive(Debug, Deserialize)]
struct CurrentAccount {
    organization: OrganizationRef,
}

#[derive(Debug, Deserialize)]
struct OrganizationRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QuotaCostList {
    #[serde(default)]
    items: Vec<QuotaCost>,
}

#[derive(Debug, Deserialize)]
struct QuotaCost {
    allowed: i64,
    consumed: i64,
    #[serde(default)]
    related_resources: Vec<RelatedResource>,
}

#[derive(Debug, Deserialize)]
struct RelatedResource {
    resource_type: String,
    #[serde(default)]
    availability_zone_type: String,
}

impl QuotaCost {
    /// Whether this quota entry covers a cluster with the given AZ layout.
    fn covers_cluster(&self, multi_az: bool) -> bool {
        let wanted = if multi_az { "multi" } else { "single" };
        self.related_resources.iter().any(|r| {
            r.resource_type == "cluster"
                && (r.availability_zone_type == wanted || r.availability_zone_type == "any")
        })
    }

    fn remaining(&self) -> i64 {
        self.allowed.saturating_sub(self.consumed)
    }
}

/// `ClusterManager` backed by the provisioning REST API.
pub struct OcmClusterManager {
    api: OcmApi,
}

impl OcmClusterManager {
    pub fn new(api: OcmApi) -> Self {
        Self { api }
    }

    async fn cluster_state(&self, id: &ClusterId) -> Result<ClusterState, RunnerError> {
        let cluster: ClusterResponse = self
            .api
            .get_json(&format!("{}/{}", CLUSTERS_PATH, id))
            .await?;
        Ok(cluster.state)
    }

    async fn credential(&self, id: &ClusterId) -> Result<SecretString, RunnerError> {
        let credentials: CredentialsResponse = self
            .api
            .get_json(&format!("{}/{}/credentials", CLUSTERS_PATH, id))
            .await?;
        Ok(credentials.kubeconfig)
    }

    async fn wait_until_ready(&self, id: &ClusterId, spec: &ProvisionSpec) -> Result<(), RunnerError> {
        poll_until(
            "cluster to become ready",
            PollPolicy::with_timeout(spec.ready_timeout),
            || async {
                match self.cluster_state(id).await {
                    Ok(ClusterState::Ready) => Ok(Probe::Ready(())),
                    Ok(ClusterState::Error) => Err(RunnerError::Provision(format!(
                        "cluster {} entered error state",
                        id
                    ))),
                    Ok(state) => {
                        info!(target: "e2e.services.cluster", cluster_id = %id, state = ?state, "Waiting for cluster");
                        Ok(Probe::Pending)
                    }
                    // Transient API errors while installing are retried until the deadline.
                    Err(e) => {
                        warn!(target: "e2e.services.cluster", cluster_id = %id, error = %e, "Cluster status check failed");
                        Ok(Probe::Pending)
                    }
                }
            },
        )
        .await
    }
}

#[async_trait::async_trait]
impl ClusterManager for OcmClusterManager {
    #[instrument(skip_all, fields(cluster_name = %spec.name, multi_az = spec.multi_az))]
    async fn check_quota(&self, spec: &ProvisionSpec) -> Result<bool, RunnerError> {
        let account: CurrentAccount = self.api.get_json(CURRENT_ACCOUNT_PATH).await?;
        let quota: QuotaCostList = self
            .api
            .get_json(&format!(
                "/api/accounts_mgmt/v1/organizations/{}/quota_cost?fetchRelatedResources=true",
                account.organization.id
            ))
            .await?;

        let remaining: i64 = quota
            .items
            .iter()
            .filter(|q| q.covers_cluster(spec.multi_az))
            .map(QuotaCost::remaining)
            .filter(|r| *r > 0)
            .sum();

        info!(target: "e2e.services.cluster", remaining = remaining, "Cluster quota checked");
        Ok(remaining > 0)
    }

    #[instrument(skip_all, fields(cluster_name = %spec.name, version = ?spec.version))]
    async fn create(&self, spec: &ProvisionSpec) -> Result<ClusterId, RunnerError> {
        let expiry_minutes = i64::try_from(spec.expiry_minutes).unwrap_or(i64::MAX);
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::minutes(expiry_minutes))
            .unwrap_or_else(Utc::now);

        let request = CreateClusterRequest {
            name: &spec.name,
            managed: true,
            multi_az: spec.multi_az,
            expiration_timestamp: expiration.to_rfc3339(),
            version: spec.version.as_deref().map(|id| VersionRef { id }),
        };

        let created: ClusterResponse = self
            .api
            .post_json(CLUSTERS_PATH, &request)
            .await
            .map_err(|e| RunnerError::Provision(e.to_string()))?;

        let id = ClusterId::new(created.id).map_err(|e| RunnerError::Provision(e.to_string()))?;

        info!(target: "e2e.services.cluster", cluster_id = %id, "Cluster created");
        Ok(id)
    }

    #[instrument(skip_all, fields(cluster_id = %id))]
    async fn wait_ready(&self, id: &ClusterId, spec: &ProvisionSpec) -> Result<ClusterHandle, RunnerError> {
        self.wait_until_ready(id, spec).await?;
        let credential = self.credential(id).await?;

        info!(target: "e2e.services.cluster", cluster_id = %id, "Cluster is ready");

        Ok(ClusterHandle {
            id: id.clone(),
            name: spec.name.clone(),
            credential: Some(credential),
        })
    }

    #[instrument(skip_all, fields(cluster_id = %id))]
    async fn attach(&self, id: &ClusterId) -> Result<ClusterHandle, RunnerError> {
        let cluster: ClusterResponse = self
            .api
            .get_json(&format!("{}/{}", CLUSTERS_PATH, id))
            .await?;

        if cluster.state != ClusterState::Ready {
            return Err(RunnerError::Provision(format!(
                "cluster {} is not ready (state {:?})",
                id, cluster.state
            )));
        }

        let credential = self.credential(id).await?;

        Ok(ClusterHandle {
            id: id.clone(),
            name: cluster.name,
            credential: Some(credential),
        })
    }

    #[instrument(skip_all, fields(cluster_id = %id))]
    async fn delete(&self, id: &ClusterId) -> Result<(), RunnerError> {
        let deleted = self
            .api
            .delete(&format!("{}/{}", CLUSTERS_PATH, id))
            .await
            .map_err(|e| RunnerError::ClusterDelete {
                cluster_id: id.clone(),
                message: e.to_string(),
            })?;

        if !deleted {
            info!(target: "e2e.services.cluster", cluster_id = %id, "Cluster already deleted");
        }
        Ok(())
    }
}

/// Mock cluster manager module for testing.
///
/// This module provides a recording implementation of `ClusterManager`
/// with scriptable failures at every operation.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Scripted quota check result.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum QuotaBehavior {
        Enough,
        Insufficient,
        Unavailable,
    }

    /// Scripted provisioning result.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ProvisionBehavior {
        /// Ready cluster with a credential.
        Succeed,
        /// Ready cluster but the provider issued no credential.
        SucceedWithoutCredential,
        /// Fails before anything is created.
        Fail,
        /// Creates the cluster, then fails waiting for it.
        FailAfterCreate,
        /// Creates the cluster, which then never becomes ready.
        Hang,
    }

    /// Mock cluster manager for unit testing.
    pub struct MockClusterManager {
        quota: QuotaBehavior,
        provision: ProvisionBehavior,
        fail_attach: bool,
        fail_delete: bool,
        cluster_id: String,
        quota_calls: AtomicUsize,
        provision_calls: AtomicUsize,
        attach_calls: AtomicUsize,
        deleted: Mutex<Vec<ClusterId>>,
    }

    impl Default for MockClusterManager {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockClusterManager {
        /// Mock with enough quota that provisions successfully.
        pub fn new() -> Self {
            Self {
                quota: QuotaBehavior::Enough,
                provision: ProvisionBehavior::Succeed,
                fail_attach: false,
                fail_delete: false,
                cluster_id: "mock-cluster-1".to_string(),
                quota_calls: AtomicUsize::new(0),
                provision_calls: AtomicUsize::new(0),
                attach_calls: AtomicUsize::new(0),
                deleted: Mutex::new(Vec::new()),
            }
        }

        pub fn with_quota(mut self, quota: QuotaBehavior) -> Self {
            self.quota = quota;
            self
        }

        pub fn with_provision(mut self, provision: ProvisionBehavior) -> Self {
            self.provision = provision;
            self
        }

        pub fn with_cluster_id(mut self, id: &str) -> Self {
            self.cluster_id = id.to_string();
            self
        }

        pub fn failing_attach(mut self) -> Self {
            self.fail_attach = true;
            self
        }

        pub fn failing_delete(mut self) -> Self {
            self.fail_delete = true;
            self
        }

        pub fn quota_calls(&self) -> usize {
            self.quota_calls.load(Ordering::SeqCst)
        }

        /// Cluster creation requests made.
        pub fn provision_calls(&self) -> usize {
            self.provision_calls.load(Ordering::SeqCst)
        }

        pub fn attach_calls(&self) -> usize {
            self.attach_calls.load(Ordering::SeqCst)
        }

        /// Delete calls made, successful or not.
        pub fn delete_calls(&self) -> usize {
            self.deleted_ids().len()
        }

        pub fn deleted_ids(&self) -> Vec<ClusterId> {
            self.deleted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn id(&self) -> Result<ClusterId, RunnerError> {
            ClusterId::new(self.cluster_id.clone())
                .map_err(|e| RunnerError::Provision(e.to_string()))
        }
    }

    #[async_trait::async_trait]
    impl ClusterManager for MockClusterManager {
        async fn check_quota(&self, _spec: &ProvisionSpec) -> Result<bool, RunnerError> {
            self.quota_calls.fetch_add(1, Ordering::SeqCst);
            match self.quota {
                QuotaBehavior::Enough => Ok(true),
                QuotaBehavior::Insufficient => Ok(false),
                QuotaBehavior::Unavailable => {
                    Err(RunnerError::ClusterApi("mock quota API unavailable".to_string()))
                }
            }
        }

        async fn create(&self, _spec: &ProvisionSpec) -> Result<ClusterId, RunnerError> {
            self.provision_calls.fetch_add(1, Ordering::SeqCst);
            if self.provision == ProvisionBehavior::Fail {
                return Err(RunnerError::Provision("mock provisioning failure".to_string()));
            }
            self.id()
        }

        async fn wait_ready(
            &self,
            id: &ClusterId,
            spec: &ProvisionSpec,
        ) -> Result<ClusterHandle, RunnerError> {
            let credential = match self.provision {
                ProvisionBehavior::SucceedWithoutCredential => None,
                ProvisionBehavior::FailAfterCreate => {
                    return Err(RunnerError::Provision(
                        "mock cluster entered error state".to_string(),
                    ))
                }
                ProvisionBehavior::Hang => std::future::pending().await,
                ProvisionBehavior::Succeed | ProvisionBehavior::Fail => {
                    Some(SecretString::from("mock-kubeconfig"))
                }
            };
            Ok(ClusterHandle {
                id: id.clone(),
                name: spec.name.clone(),
                credential,
            })
        }

        async fn attach(&self, id: &ClusterId) -> Result<ClusterHandle, RunnerError> {
            self.attach_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_attach {
                return Err(RunnerError::Provision(format!("mock cluster {} not found", id)));
            }
            Ok(ClusterHandle {
                id: id.clone(),
                name: "existing".to_string(),
                credential: Some(SecretString::from("mock-kubeconfig")),
            })
        }

        async fn delete(&self, id: &ClusterId) -> Result<(), RunnerError> {
            self.deleted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(id.clone());
            if self.fail_delete {
                return Err(RunnerError::ClusterDelete {
                    cluster_id: id.clone(),
                    message: "mock delete failure".to_string(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec(multi_az: bool) -> ProvisionSpec {
        ProvisionSpec {
            name: "e2e-abc".to_string(),
            version: Some("openshift-v4.12.3".to_string()),
            environment: "prod".to_string(),
            multi_az,
            expiry_minutes: 210,
            ready_timeout: Duration::from_secs(1),
        }
    }

    fn manager(server: &MockServer) -> OcmClusterManager {
        OcmClusterManager::new(OcmApi::new(server.uri(), Some(SecretString::from("t"))).unwrap())
    }

    async fn mount_quota(server: &MockServer, items: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(CURRENT_ACCOUNT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"organization": {"id": "org-1"}})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/accounts_mgmt/v1/organizations/org-1/quota_cost"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": items })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_check_quota_enough() {
        let server = MockServer::start().await;
        mount_quota(
            &server,
            serde_json::json!([{
                "allowed": 5, "consumed": 4,
                "related_resources": [{"resource_type": "cluster", "availability_zone_type": "single"}]
            }]),
        )
        .await;

        assert!(manager(&server).check_quota(&spec(false)).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_quota_insufficient_for_multi_az() {
        let server = MockServer::start().await;
        mount_quota(
            &server,
            serde_json::json!([
                {"allowed": 5, "consumed": 0,
                 "related_resources": [{"resource_type": "cluster", "availability_zone_type": "single"}]},
                {"allowed": 2, "consumed": 2,
                 "related_resources": [{"resource_type": "cluster", "availability_zone_type": "multi"}]},
                {"allowed": 9, "consumed": 0,
                 "related_resources": [{"resource_type": "compute.node", "availability_zone_type": "any"}]}
            ]),
        )
        .await;

        assert!(!manager(&server).check_quota(&spec(true)).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_quota_transport_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(manager(&server).check_quota(&spec(false)).await.is_err());
    }

    #[tokio::test]
    async fn test_provision_ready_cluster() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CLUSTERS_PATH))
            .and(body_partial_json(serde_json::json!({
                "name": "e2e-abc",
                "version": {"id": "openshift-v4.12.3"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(
                serde_json::json!({"id": "c-1", "name": "e2e-abc", "state": "pending"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/c-1", CLUSTERS_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": "c-1", "name": "e2e-abc", "state": "ready"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/c-1/credentials", CLUSTERS_PATH)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"kubeconfig": "kc"})),
            )
            .mount(&server)
            .await;

        let manager = manager(&server);
        let id = manager.create(&spec(false)).await.unwrap();
        assert_eq!(id.as_str(), "c-1");

        let handle = manager.wait_ready(&id, &spec(false)).await.unwrap();
        assert_eq!(handle.id, id);
        assert_eq!(handle.name, "e2e-abc");
        assert!(handle.credential.is_some());
    }

    #[tokio::test]
    async fn test_wait_ready_fails_on_error_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CLUSTERS_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(
                serde_json::json!({"id": "c-2", "state": "pending"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/c-2", CLUSTERS_PATH)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "c-2", "state": "error"})),
            )
            .mount(&server)
            .await;

        let manager = manager(&server);
        let id = manager.create(&spec(false)).await.unwrap();
        assert_eq!(id.as_str(), "c-2");

        let result = manager.wait_ready(&id, &spec(false)).await;
        assert!(matches!(result, Err(RunnerError::Provision(msg)) if msg.contains("error state")));
    }

    #[tokio::test]
    async fn test_create_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad version"))
            .mount(&server)
            .await;

        let result = manager(&server).create(&spec(false)).await;
        assert!(matches!(result, Err(RunnerError::Provision(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/c-3", CLUSTERS_PATH)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let id = ClusterId::new("c-3").unwrap();
        assert!(manager(&server).delete(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_attach_requires_ready_cluster() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/c-4", CLUSTERS_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": "c-4", "state": "installing"}),
            ))
            .mount(&server)
            .await;

        let id = ClusterId::new("c-4").unwrap();
        let result = manager(&server).attach(&id).await;
        assert!(matches!(result, Err(RunnerError::Provision(msg)) if msg.contains("not ready")));
    }

    #[test]
    fn test_unknown_state_deserializes() {
        let cluster: ClusterResponse =
            serde_json::from_str(r#"{"id":"x","state":"hibernating"}"#).unwrap();
        assert_eq!(cluster.state, ClusterState::Unknown);
    }
}
