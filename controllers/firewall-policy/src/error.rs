//! Controller-specific error types.
//!
//! This module defines error types specific to the Firewall Policy Controller
//! that are not covered by the cluster client errors.

use cluster_client::ClusterError;
use thiserror::Error;

/// Errors that can occur in the Firewall Policy Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster API error (list, watch or client construction)
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fetch did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Resource watch task failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Two reconciliation passes overlapped
    #[error("Invariant violated: {0}")]
    Invariant(String),
}
