//! Mock ClusterClient for unit testing
//!
//! This module provides a mock implementation of ClusterClientTrait that can be used
//! in unit tests without requiring a running Kubernetes API server.
//!
//! Watch streams are scripted: every `watch()` call opens a new subscription
//! whose events are pushed by the test through [`MockClusterClient::emit`].
//! Closing a subscription ends its stream, which models a dropped watch.

use crate::cluster_trait::{ClusterClientTrait, WatchStream};
use crate::error::ClusterError;
use crate::models::WatchEvent;
use firewall_rules::{NetworkPolicyRecord, ResourceKind, ServiceRecord};
use futures::StreamExt;
use futures::channel::mpsc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type WatchSender = mpsc::UnboundedSender<Result<WatchEvent, ClusterError>>;

/// Mock ClusterClient for testing
///
/// This mock stores records in memory and can be configured to fail
/// either list call or to delay every list call.
#[derive(Clone, Debug, Default)]
pub struct MockClusterClient {
    services: Arc<Mutex<Vec<ServiceRecord>>>,
    policies: Arc<Mutex<Vec<NetworkPolicyRecord>>>,
    service_failure: Arc<Mutex<Option<String>>>,
    policy_failure: Arc<Mutex<Option<String>>>,
    list_delay: Arc<Mutex<Option<Duration>>>,
    service_lists: Arc<AtomicUsize>,
    policy_lists: Arc<AtomicUsize>,
    watches: Arc<Mutex<HashMap<ResourceKind, Vec<WatchSender>>>>,
}

impl MockClusterClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored services (for test setup)
    pub fn set_services(&self, services: Vec<ServiceRecord>) {
        *self.services.lock().unwrap() = services;
    }

    /// Add a service to the mock store (for test setup)
    pub fn add_service(&self, service: ServiceRecord) {
        self.services.lock().unwrap().push(service);
    }

    /// Replace the stored network policies (for test setup)
    pub fn set_network_policies(&self, policies: Vec<NetworkPolicyRecord>) {
        *self.policies.lock().unwrap() = policies;
    }

    /// Add a network policy to the mock store (for test setup)
    pub fn add_network_policy(&self, policy: NetworkPolicyRecord) {
        self.policies.lock().unwrap().push(policy);
    }

    /// Make `list_services` fail with `message`, or succeed again with `None`
    pub fn fail_services(&self, message: Option<&str>) {
        *self.service_failure.lock().unwrap() = message.map(str::to_string);
    }

    /// Make `list_network_policies` fail with `message`, or succeed again with `None`
    pub fn fail_network_policies(&self, message: Option<&str>) {
        *self.policy_failure.lock().unwrap() = message.map(str::to_string);
    }

    /// Delay every list call by `delay`
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Number of `list_services` calls so far
    pub fn service_list_calls(&self) -> usize {
        self.service_lists.load(Ordering::SeqCst)
    }

    /// Number of `list_network_policies` calls so far
    pub fn policy_list_calls(&self) -> usize {
        self.policy_lists.load(Ordering::SeqCst)
    }

    /// Number of `watch(kind)` subscriptions opened so far
    pub fn subscriptions(&self, kind: ResourceKind) -> usize {
        self.watches
            .lock()
            .unwrap()
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Push an item into the most recent `kind` subscription.
    ///
    /// Returns false when there is no open subscription.
    pub fn emit(&self, kind: ResourceKind, item: Result<WatchEvent, ClusterError>) -> bool {
        self.watches
            .lock()
            .unwrap()
            .get(&kind)
            .and_then(|senders| senders.last())
            .is_some_and(|tx| tx.unbounded_send(item).is_ok())
    }

    /// End every open `kind` subscription
    pub fn close_watch(&self, kind: ResourceKind) {
        if let Some(senders) = self.watches.lock().unwrap().get(&kind) {
            for tx in senders {
                tx.close_channel();
            }
        }
    }

    async fn delay(&self) {
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn server_version(&self) -> Result<String, ClusterError> {
        Ok("v1.30.0-mock".to_string())
    }

    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ClusterError> {
        self.service_lists.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let failure = self.service_failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(ClusterError::Api(message));
        }
        Ok(self.services.lock().unwrap().clone())
    }

    async fn list_network_policies(&self) -> Result<Vec<NetworkPolicyRecord>, ClusterError> {
        self.policy_lists.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let failure = self.policy_failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(ClusterError::Api(message));
        }
        Ok(self.policies.lock().unwrap().clone())
    }

    fn watch(&self, kind: ResourceKind) -> WatchStream {
        let (tx, rx) = mpsc::unbounded();
        self.watches.lock().unwrap().entry(kind).or_default().push(tx);
        rx.boxed()
    }
}
