//! Assembly of a [`FirewallRuleSet`] from a resource snapshot.
//!
//! Assembly is a pure function of its inputs. For every NetworkPolicy:
//!
//! 1. The policy's `podSelector` is matched against the pod selectors of the
//!    Services in the policy's namespace. Those Services are the policy's
//!    targets.
//! 2. Each ingress rule yields `peer -> target` rules, each egress rule yields
//!    `target -> peer` rules. Peers resolve to CIDR blocks, to `any`, or to the
//!    Services selected by the peer's pod/namespace selectors.
//! 3. Ports are intersected with the Service's ports when the far end is a
//!    Service; otherwise they are emitted as written.
//!
//! Selectors that resolve to nothing produce no rules. That is a valid
//! outcome, not an error.

use crate::labels::namespace_labels;
use crate::records::{NetworkPolicyRecord, Peer, PolicyPort, PolicyRule, PortRef, Protocol, ServiceRecord};
use crate::rule::{Endpoint, FirewallRule, FirewallRuleSet, PortSpec};
use std::collections::BTreeMap;
use tracing::debug;

/// Assembles the canonical rule set for a snapshot.
///
/// The result does not depend on the order of `services` or `policies`.
pub fn assemble(services: &[ServiceRecord], policies: &[NetworkPolicyRecord]) -> FirewallRuleSet {
    let index = ServiceIndex::new(services);
    let mut rules = Vec::new();

    for policy in policies {
        let targets = index.targets_of(policy);
        if targets.is_empty() {
            debug!("NetworkPolicy {} selects no service", policy.key());
            continue;
        }

        if policy.applies_ingress {
            for rule in &policy.ingress {
                for peer in index.resolve_peers(policy, rule) {
                    for target in &targets {
                        for (port, protocol) in service_ports(target, &rule.ports) {
                            rules.push(FirewallRule::allow(
                                peer.endpoint(),
                                endpoint_of(target),
                                port,
                                protocol,
                            ));
                        }
                    }
                }
            }
        }

        if policy.applies_egress {
            for rule in &policy.egress {
                for peer in index.resolve_peers(policy, rule) {
                    let ports = match &peer {
                        Resolved::Service(svc) => service_ports(svc, &rule.ports),
                        Resolved::Literal(_) => literal_ports(policy, &rule.ports),
                    };
                    for target in &targets {
                        for (port, protocol) in &ports {
                            rules.push(FirewallRule::allow(
                                endpoint_of(target),
                                peer.endpoint(),
                                *port,
                                *protocol,
                            ));
                        }
                    }
                }
            }
        }
    }

    FirewallRuleSet::from_rules(rules)
}

/// A peer after selector resolution.
#[derive(Debug, Clone)]
enum Resolved<'a> {
    Service(&'a ServiceRecord),
    Literal(Endpoint),
}

impl Resolved<'_> {
    fn endpoint(&self) -> Endpoint {
        match self {
            Resolved::Service(svc) => endpoint_of(svc),
            Resolved::Literal(endpoint) => endpoint.clone(),
        }
    }
}

fn endpoint_of(svc: &ServiceRecord) -> Endpoint {
    Endpoint::service(svc.namespace.clone(), svc.name.clone())
}

/// Services that front pods, grouped by namespace.
struct ServiceIndex<'a> {
    by_namespace: BTreeMap<&'a str, Vec<&'a ServiceRecord>>,
}

impl<'a> ServiceIndex<'a> {
    fn new(services: &'a [ServiceRecord]) -> Self {
        let mut by_namespace: BTreeMap<&str, Vec<&ServiceRecord>> = BTreeMap::new();
        for svc in services.iter().filter(|s| s.fronts_pods()) {
            by_namespace.entry(svc.namespace.as_str()).or_default().push(svc);
        }
        Self { by_namespace }
    }

    fn in_namespace(&self, namespace: &str) -> impl Iterator<Item = &'a ServiceRecord> + '_ {
        self.by_namespace
            .get(namespace)
            .into_iter()
            .flat_map(|v| v.iter().copied())
    }

    fn targets_of(&self, policy: &NetworkPolicyRecord) -> Vec<&'a ServiceRecord> {
        self.in_namespace(&policy.namespace)
            .filter(|svc| policy.pod_selector.matches(&svc.selector))
            .collect()
    }

    fn resolve_peers(&self, policy: &NetworkPolicyRecord, rule: &PolicyRule) -> Vec<Resolved<'a>> {
        if rule.peers.is_empty() {
            return vec![Resolved::Literal(Endpoint::Any)];
        }

        let mut resolved = Vec::new();
        for peer in &rule.peers {
            match peer {
                Peer::IpBlock { cidr, except } => {
                    resolved.push(Resolved::Literal(Endpoint::cidr(*cidr, except.iter().copied())));
                }
                Peer::Selector {
                    pod_selector,
                    namespace_selector,
                } => {
                    let namespaces: Vec<&str> = match namespace_selector {
                        None => vec![policy.namespace.as_str()],
                        Some(selector) => self
                            .by_namespace
                            .keys()
                            .copied()
                            .filter(|ns| selector.matches(&namespace_labels(ns)))
                            .collect(),
                    };
                    let before = resolved.len();
                    for ns in namespaces {
                        resolved.extend(
                            self.in_namespace(ns)
                                .filter(|svc| {
                                    pod_selector
                                        .as_ref()
                                        .is_none_or(|sel| sel.matches(&svc.selector))
                                })
                                .map(Resolved::Service),
                        );
                    }
                    if resolved.len() == before {
                        debug!("NetworkPolicy {} has a peer selector matching no service", policy.key());
                    }
                }
            }
        }
        resolved
    }
}

/// Ports of `svc` admitted by `ports` (all of them when `ports` is empty).
fn service_ports(svc: &ServiceRecord, ports: &[PolicyPort]) -> Vec<(PortSpec, Protocol)> {
    svc.ports
        .iter()
        .filter(|sp| ports.is_empty() || ports.iter().any(|pp| pp.admits(sp)))
        .map(|sp| (PortSpec::Single(sp.port), sp.protocol))
        .collect()
}

/// Ports towards a CIDR or `any` peer, emitted as written.
fn literal_ports(policy: &NetworkPolicyRecord, ports: &[PolicyPort]) -> Vec<(PortSpec, Protocol)> {
    if ports.is_empty() {
        return Protocol::ALL.iter().map(|p| (PortSpec::Any, *p)).collect();
    }
    ports
        .iter()
        .filter_map(|pp| match &pp.port {
            None => Some((PortSpec::Any, pp.protocol)),
            Some(PortRef::Number(start)) => match pp.end_port {
                Some(end) if end > *start => Some((PortSpec::Range { start: *start, end }, pp.protocol)),
                _ => Some((PortSpec::Single(*start), pp.protocol)),
            },
            Some(PortRef::Name(name)) => {
                debug!(
                    "NetworkPolicy {} names port {} towards a non-service peer; skipped",
                    policy.key(),
                    name
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "assemble_test.rs"]
mod assemble_test;
