//! Cluster client errors

use firewall_rules::RuleError;
use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API request failed
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be read or resolved
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// API call failed without a kube error (mock and injected failures)
    #[error("API error: {0}")]
    Api(String),

    /// Watch stream reported an error
    #[error("Watch stream error: {0}")]
    Stream(String),

    /// Object could not be converted into a record
    #[error("Invalid object {key}: {source}")]
    InvalidObject {
        key: String,
        #[source]
        source: RuleError,
    },

    /// Object is missing a required metadata field
    #[error("Object missing {0}")]
    MissingField(&'static str),
}
