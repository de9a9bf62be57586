//! Cluster Client
//!
//! List and watch access to the two resource kinds the firewall policy
//! controller derives rules from: Services and NetworkPolicies.
//!
//! All queries are cluster-scoped. Listing returns [`firewall_rules`] records
//! converted from the `k8s-openapi` objects; watching returns a stream of
//! payload-free [`WatchEvent`]s, since the controller always re-fetches full
//! state instead of applying deltas.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient};
//! use firewall_rules::ResourceKind;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::try_default().await?;
//!
//! let services = client.list_services().await?;
//! println!("{} services", services.len());
//!
//! let mut events = client.watch(ResourceKind::NetworkPolicy);
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod convert;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::{ClusterClientTrait, WatchStream};
pub use error::ClusterError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::MockClusterClient;
