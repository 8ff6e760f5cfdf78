//! Reclaims the resources a run created.
//!
//! What is reclaimed depends on who owns the cluster:
//!
//! - Owned cluster, destroy policy on: delete the cluster (including one
//!   left behind by a failed provisioning attempt)
//! - Owned cluster, destroy policy off: keep it and log its identity
//! - Attached cluster: delete every suite-created workload, never the cluster
//!
//! Individual failures are collected, never short-circuited, and cleanup is
//! a no-op once it has run for a given `RunState`.

use crate::errors::RunnerError;
use crate::eventual::bounded;
use crate::models::ClusterBinding;
use crate::orchestrator::state::RunState;
use crate::services::cluster_manager::ClusterManager;
use crate::services::workloads::WorkloadClient;
use common::secret::SecretString;
use common::types::{ClusterId, RunSuffix};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Cleanup policy and the collaborators it needs.
pub struct CleanupCoordinator {
    clusters: Arc<dyn ClusterManager>,
    workloads: Arc<dyn WorkloadClient>,
    destroy_cluster: bool,
    environment: String,
    suffix: RunSuffix,
    timeout: Duration,
}

impl CleanupCoordinator {
    pub fn new(
        clusters: Arc<dyn ClusterManager>,
        workloads: Arc<dyn WorkloadClient>,
        destroy_cluster: bool,
        environment: impl Into<String>,
        suffix: RunSuffix,
        timeout: Duration,
    ) -> Self {
        Self {
            clusters,
            workloads,
            destroy_cluster,
            environment: environment.into(),
            suffix,
            timeout,
        }
    }

    /// Reclaim everything `state` holds. Returns the errors encountered.
    #[instrument(skip_all)]
    pub async fn cleanup(&self, state: &mut RunState) -> Vec<RunnerError> {
        if state.cluster_released {
            return Vec::new();
        }

        let errors = match state.binding() {
            Some(ClusterBinding::Attached { credential }) => {
                if state.any_phase_started() {
                    self.delete_workloads(credential).await
                } else {
                    info!(target: "e2e.cleanup", "No phase ran, no workloads to clean up");
                    Vec::new()
                }
            }
            Some(ClusterBinding::Owned(_)) | None => match state.owned_cluster_id() {
                Some(id) => self.release_cluster(id).await,
                None => {
                    info!(target: "e2e.cleanup", "No cluster was created, nothing to clean up");
                    Vec::new()
                }
            },
        };

        state.cluster_released = true;
        errors
    }

    async fn release_cluster(&self, id: &ClusterId) -> Vec<RunnerError> {
        if !self.destroy_cluster {
            info!(
                target: "e2e.cleanup",
                cluster_id = %id,
                environment = %self.environment,
                "For debugging, please look for cluster ID {} in environment {}",
                id,
                self.environment
            );
            return Vec::new();
        }

        info!(target: "e2e.cleanup", cluster_id = %id, "Destroying cluster");
        match bounded("cluster deletion", self.timeout, self.clusters.delete(id)).await {
            Ok(()) => {
                info!(target: "e2e.cleanup", cluster_id = %id, "Cluster deleted");
                Vec::new()
            }
            Err(e) => {
                warn!(target: "e2e.cleanup", cluster_id = %id, error = %e, "Cluster deletion failed");
                vec![e]
            }
        }
    }

    async fn delete_workloads(&self, credential: &SecretString) -> Vec<RunnerError> {
        let listed = bounded(
            "workload enumeration",
            self.timeout,
            self.workloads.list_workloads(credential, &self.suffix),
        )
        .await;

        let workloads = match listed {
            Ok(workloads) => workloads,
            Err(e) => {
                warn!(target: "e2e.cleanup", error = %e, "Could not enumerate workloads");
                return vec![e];
            }
        };

        info!(target: "e2e.cleanup", count = workloads.len(), "Deleting workloads");

        let mut errors = Vec::new();
        for workload in &workloads {
            let deleted = bounded(
                &format!("deletion of workload {}", workload.name),
                self.timeout,
                self.workloads.delete_workload(credential, workload),
            )
            .await;

            match deleted {
                Ok(()) => info!(target: "e2e.cleanup", workload = %workload.name, "Workload deleted"),
                Err(e) => {
                    warn!(target: "e2e.cleanup", workload = %workload.name, error = %e, "Workload deletion failed");
                    errors.push(e);
                }
            }
        }
        errors
    }
}
