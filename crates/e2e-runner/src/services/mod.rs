//! Service layer for the runner.
//!
//! This module contains the collaborators the orchestrator drives. Each
//! exposes a trait consumed by the orchestrator, a concrete implementation
//! and a `mock` module with recording fakes.
//!
//! # Components
//!
//! - `ocm` - HTTP client for the provisioning API
//! - `cluster_manager` - Cluster create/attach/delete and quota checks
//! - `versions` - Install version and upgrade target selection
//! - `kubeconfig` - Cluster API client and private kubeconfig file from a credential
//! - `upgrade` - In-cluster upgrade driver
//! - `workloads` - Suite-created namespaces (attached mode cleanup)
//! - `test_engine` - Runs the suite for one phase
//! - `metrics_publisher` - Uploads the metrics artifact

pub mod cluster_manager;
pub mod kubeconfig;
pub mod metrics_publisher;
pub mod ocm;
pub mod test_engine;
pub mod upgrade;
pub mod versions;
pub mod workloads;

pub use cluster_manager::{ClusterManager, OcmClusterManager};
pub use metrics_publisher::{metrics_key, MetricsPublisher, S3MetricsPublisher};
pub use ocm::OcmApi;
pub use test_engine::{CommandTestEngine, EngineRequest, TestEngine};
pub use upgrade::{ClusterVersionUpgrader, UpgradeDriver};
pub use versions::{DefaultVersionSelector, OcmVersionSource, ReleaseControllerClient, VersionSelector};
pub use workloads::{NamespaceWorkloads, WorkloadClient};
