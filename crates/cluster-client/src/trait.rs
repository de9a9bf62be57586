//! ClusterClient trait for mocking
//!
//! This trait abstracts the Kubernetes client to enable mocking in unit tests.
//! The concrete KubeClusterClient implements this trait, and tests can use mock implementations.

use crate::error::ClusterError;
use crate::models::WatchEvent;
use firewall_rules::{NetworkPolicyRecord, ResourceKind, ServiceRecord};
use futures::stream::BoxStream;

/// Stream of change notifications for one resource kind.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ClusterError>>;

/// Trait for cluster API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Git version of the API server; doubles as a connectivity check
    async fn server_version(&self) -> Result<String, ClusterError>;

    /// Every Service in the cluster
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ClusterError>;

    /// Every NetworkPolicy in the cluster
    async fn list_network_policies(&self) -> Result<Vec<NetworkPolicyRecord>, ClusterError>;

    /// Opens a new cluster-wide watch on `kind`.
    ///
    /// The stream starts with the synthetic notifications of the initial
    /// listing. Errors are yielded as items; the stream keeps going after an
    /// error and re-lists.
    fn watch(&self, kind: ResourceKind) -> WatchStream;
}
