//! In-cluster workloads created by the test suite.
//!
//! In attached mode the cluster outlives the run, so the namespaces the
//! suite created must be removed individually. The suite labels every
//! namespace it creates with the run suffix; enumeration is by that label.

use crate::errors::RunnerError;
use crate::models::Workload;
use crate::services::kubeconfig::{client_for, is_not_found};
use common::secret::SecretString;
use common::types::RunSuffix;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams};
use tracing::{debug, instrument};

/// Label carrying the run suffix on suite-created namespaces.
pub const RUN_SUFFIX_LABEL: &str = "e2e-runner.io/run-suffix";

/// Trait for workload enumeration and deletion (enables mocking).
#[async_trait::async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Workloads created by the run identified by `suffix`.
    async fn list_workloads(
        &self,
        credential: &SecretString,
        suffix: &RunSuffix,
    ) -> Result<Vec<Workload>, RunnerError>;

    /// Delete one workload. Deleting a missing workload succeeds.
    async fn delete_workload(
        &self,
        credential: &SecretString,
        workload: &Workload,
    ) -> Result<(), RunnerError>;
}

/// `WorkloadClient` backed by cluster namespaces.
#[derive(Debug, Default)]
pub struct NamespaceWorkloads;

impl NamespaceWorkloads {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl WorkloadClient for NamespaceWorkloads {
    #[instrument(skip_all, fields(suffix = %suffix))]
    async fn list_workloads(
        &self,
        credential: &SecretString,
        suffix: &RunSuffix,
    ) -> Result<Vec<Workload>, RunnerError> {
        let client = client_for(credential)
            .await
            .map_err(|e| RunnerError::WorkloadList(e.to_string()))?;
        let namespaces: Api<Namespace> = Api::all(client);
        let selector = format!("{}={}", RUN_SUFFIX_LABEL, suffix);

        let listed = namespaces
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| RunnerError::WorkloadList(e.to_string()))?;

        let workloads: Vec<Workload> = listed
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .map(Workload::new)
            .collect();
        debug!(target: "e2e.services.workloads", count = workloads.len(), "Listed workloads");
        Ok(workloads)
    }

    #[instrument(skip_all, fields(workload = %workload.name))]
    async fn delete_workload(
        &self,
        credential: &SecretString,
        workload: &Workload,
    ) -> Result<(), RunnerError> {
        let to_error = |message: String| RunnerError::WorkloadDelete {
            name: workload.name.clone(),
            message,
        };

        let client = client_for(credential).await.map_err(|e| to_error(e.to_string()))?;
        let namespaces: Api<Namespace> = Api::all(client);

        match namespaces.delete(&workload.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(target: "e2e.services.workloads", "Workload already gone");
                Ok(())
            }
            Err(e) => Err(to_error(e.to_string())),
        }
    }
}

/// Mock workload client module for testing.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Mock workload client with a fixed workload list.
    pub struct MockWorkloadClient {
        workloads: Vec<Workload>,
        failing: HashSet<String>,
        fail_list: bool,
        list_calls: AtomicUsize,
        attempted: Mutex<Vec<String>>,
    }

    impl Default for MockWorkloadClient {
        fn default() -> Self {
            Self::with_workloads(&[])
        }
    }

    impl MockWorkloadClient {
        pub fn with_workloads(names: &[&str]) -> Self {
            Self {
                workloads: names.iter().map(|n| Workload::new(*n)).collect(),
                failing: HashSet::new(),
                fail_list: false,
                list_calls: AtomicUsize::new(0),
                attempted: Mutex::new(Vec::new()),
            }
        }

        /// Make deletion of `name` fail.
        pub fn failing_delete_of(mut self, name: &str) -> Self {
            self.failing.insert(name.to_string());
            self
        }

        pub fn failing_list(mut self) -> Self {
            self.fail_list = true;
            self
        }

        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        /// Names whose deletion was attempted, in order.
        pub fn delete_attempts(&self) -> Vec<String> {
            self.attempted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait::async_trait]
    impl WorkloadClient for MockWorkloadClient {
        async fn list_workloads(
            &self,
            _credential: &SecretString,
            _suffix: &RunSuffix,
        ) -> Result<Vec<Workload>, RunnerError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list {
                return Err(RunnerError::WorkloadList("mock: API unreachable".to_string()));
            }
            Ok(self.workloads.clone())
        }

        async fn delete_workload(
            &self,
            _credential: &SecretString,
            workload: &Workload,
        ) -> Result<(), RunnerError> {
            self.attempted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(workload.name.clone());
            if self.failing.contains(&workload.name) {
                return Err(RunnerError::WorkloadDelete {
                    name: workload.name.clone(),
                    message: "mock: forbidden".to_string(),
                });
            }
            Ok(())
        }
    }
}
