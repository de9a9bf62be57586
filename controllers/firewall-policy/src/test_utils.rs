//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test records and for waiting on
//! asynchronous controller state without real-time sleeps (tests run with a
//! paused clock).

use crate::trigger::{Trigger, TriggerSignal};
use cluster_client::MockClusterClient;
use firewall_rules::{
    Map, NetworkPolicyRecord, Peer, PolicyPort, PolicyRule, PortRef, Protocol, ResourceKind,
    Selector, ServicePort, ServiceRecord,
};
use std::time::Duration;

/// Helper to create a Service selecting pods labelled `app=<app>`
pub fn create_test_service(namespace: &str, name: &str, app: &str, ports: &[u16]) -> ServiceRecord {
    ServiceRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: Map::new(),
        selector: Map::from([("app".to_string(), app.to_string())]),
        ports: ports.iter().map(|p| ServicePort::tcp(*p)).collect(),
    }
}

/// Helper to create an ingress policy admitting `cidr` on TCP `port` to every pod of the namespace
pub fn create_test_cidr_policy(namespace: &str, name: &str, cidr: &str, port: u16) -> NetworkPolicyRecord {
    NetworkPolicyRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        pod_selector: Selector::everything(),
        applies_ingress: true,
        applies_egress: false,
        ingress: vec![PolicyRule {
            peers: vec![Peer::ip_block(cidr, Vec::<String>::new()).unwrap()],
            ports: vec![PolicyPort {
                protocol: Protocol::Tcp,
                port: Some(PortRef::Number(port)),
                end_port: None,
            }],
        }],
        egress: Vec::new(),
    }
}

/// Waits (in virtual time) until the mock has seen `count` subscriptions for `kind`
pub async fn wait_for_subscriptions(mock: &MockClusterClient, kind: ResourceKind, count: usize) {
    for _ in 0..1000 {
        if mock.subscriptions(kind) >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} {} subscriptions, saw {}",
        count,
        kind,
        mock.subscriptions(kind)
    );
}

/// Takes the next trigger, failing the test if none arrives
pub async fn next_trigger(signal: &TriggerSignal) -> Trigger {
    tokio::time::timeout(Duration::from_secs(5), signal.wait())
        .await
        .expect("no trigger arrived")
        .expect("signal closed")
}

/// Asserts that no trigger is pending for a short while
pub async fn no_trigger(signal: &TriggerSignal) {
    let result = tokio::time::timeout(Duration::from_millis(100), signal.wait()).await;
    assert!(result.is_err(), "unexpected trigger: {:?}", result);
}
