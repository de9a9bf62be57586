//! Conversion from `k8s-openapi` objects into rule records.
//!
//! The API server validates these objects, so conversion failures are rare;
//! an object that cannot be represented is reported as
//! [`ClusterError::InvalidObject`] and the caller skips it.

use crate::error::ClusterError;
use firewall_rules::{
    Expression, NetworkPolicyRecord, Peer, PolicyPort, PolicyRule, PortRef, Protocol, RuleError,
    Selector, ServicePort, ServiceRecord, port_number,
};
use k8s_openapi::api::core::v1::{Service, ServicePort as KubeServicePort};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyPeer, NetworkPolicyPort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

fn identity(metadata: &ObjectMeta) -> Result<(String, String), ClusterError> {
    let namespace = metadata
        .namespace
        .clone()
        .ok_or(ClusterError::MissingField("metadata.namespace"))?;
    let name = metadata
        .name
        .clone()
        .ok_or(ClusterError::MissingField("metadata.name"))?;
    Ok((namespace, name))
}

fn invalid(namespace: &str, name: &str) -> impl FnOnce(RuleError) -> ClusterError + use<> {
    let key = format!("{namespace}/{name}");
    move |source| ClusterError::InvalidObject { key, source }
}

fn protocol(value: Option<&str>) -> Result<Protocol, RuleError> {
    value.map_or(Ok(Protocol::Tcp), str::parse::<Protocol>)
}

fn port_ref(value: &IntOrString) -> Result<PortRef, RuleError> {
    match value {
        IntOrString::Int(n) => port_number(*n).map(PortRef::Number),
        IntOrString::String(s) => Ok(s
            .parse::<u16>()
            .map_or_else(|_| PortRef::Name(s.clone()), PortRef::Number)),
    }
}

fn selector(value: &LabelSelector) -> Result<Selector, RuleError> {
    let mut out = Selector::from_labels(value.match_labels.clone().unwrap_or_default());
    for requirement in value.match_expressions.iter().flatten() {
        out = out.with_expression(Expression::new(
            requirement.key.clone(),
            requirement.operator.parse()?,
            requirement.values.clone().unwrap_or_default(),
        ));
    }
    Ok(out)
}

fn service_port(value: &KubeServicePort) -> Result<ServicePort, RuleError> {
    Ok(ServicePort {
        name: value.name.clone(),
        port: port_number(value.port)?,
        protocol: protocol(value.protocol.as_deref())?,
        target_port: value.target_port.as_ref().map(port_ref).transpose()?,
    })
}

fn peer(value: &NetworkPolicyPeer) -> Result<Peer, RuleError> {
    if let Some(block) = &value.ip_block {
        return Peer::ip_block(&block.cidr, block.except.iter().flatten());
    }
    Ok(Peer::Selector {
        pod_selector: value.pod_selector.as_ref().map(selector).transpose()?,
        namespace_selector: value.namespace_selector.as_ref().map(selector).transpose()?,
    })
}

fn policy_port(value: &NetworkPolicyPort) -> Result<PolicyPort, RuleError> {
    Ok(PolicyPort {
        protocol: protocol(value.protocol.as_deref())?,
        port: value.port.as_ref().map(port_ref).transpose()?,
        end_port: value.end_port.map(port_number).transpose()?,
    })
}

fn policy_rule(
    peers: Option<&[NetworkPolicyPeer]>,
    ports: Option<&[NetworkPolicyPort]>,
) -> Result<PolicyRule, RuleError> {
    Ok(PolicyRule {
        peers: peers.unwrap_or_default().iter().map(peer).collect::<Result<_, _>>()?,
        ports: ports.unwrap_or_default().iter().map(policy_port).collect::<Result<_, _>>()?,
    })
}

/// Converts a Service into a [`ServiceRecord`].
pub fn service_record(svc: &Service) -> Result<ServiceRecord, ClusterError> {
    let (namespace, name) = identity(&svc.metadata)?;
    let spec = svc.spec.as_ref();

    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .map(service_port)
        .collect::<Result<Vec<_>, _>>()
        .map_err(invalid(&namespace, &name))?;

    Ok(ServiceRecord {
        labels: svc.metadata.labels.clone().unwrap_or_default(),
        selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
        ports,
        namespace,
        name,
    })
}

/// Converts a NetworkPolicy into a [`NetworkPolicyRecord`].
///
/// Without `policyTypes`, a policy always affects ingress and affects egress
/// only when it has an egress section.
pub fn network_policy_record(np: &NetworkPolicy) -> Result<NetworkPolicyRecord, ClusterError> {
    let (namespace, name) = identity(&np.metadata)?;
    let spec = np.spec.clone().unwrap_or_default();

    let applies_ingress = spec
        .policy_types
        .as_ref()
        .is_none_or(|types| types.iter().any(|t| t == "Ingress"));
    let applies_egress = match spec.policy_types.as_ref() {
        Some(types) => types.iter().any(|t| t == "Egress"),
        None => spec.egress.is_some(),
    };

    let pod_selector: Option<LabelSelector> = spec.pod_selector.into();
    let convert = || -> Result<_, RuleError> {
        let pod_selector = pod_selector.as_ref().map(selector).transpose()?.unwrap_or_default();
        let ingress = spec
            .ingress
            .iter()
            .flatten()
            .map(|r| policy_rule(r.from.as_deref(), r.ports.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;
        let egress = spec
            .egress
            .iter()
            .flatten()
            .map(|r| policy_rule(r.to.as_deref(), r.ports.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((pod_selector, ingress, egress))
    };
    let (pod_selector, ingress, egress) = convert().map_err(invalid(&namespace, &name))?;

    Ok(NetworkPolicyRecord {
        namespace,
        name,
        pod_selector,
        applies_ingress,
        applies_egress,
        ingress,
        egress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(value: serde_json::Value) -> Service {
        serde_json::from_value(value).unwrap()
    }

    fn policy(value: serde_json::Value) -> NetworkPolicy {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_service_record() {
        let svc = service(json!({
            "metadata": { "name": "web", "namespace": "ns1", "labels": { "team": "a" } },
            "spec": {
                "selector": { "app": "web" },
                "ports": [
                    { "name": "http", "port": 8080, "targetPort": "http-alt" },
                    { "port": 53, "protocol": "UDP", "targetPort": 5353 }
                ]
            }
        }));

        let record = service_record(&svc).unwrap();

        assert_eq!(record.key(), "ns1/web");
        assert_eq!(record.selector.get("app").map(String::as_str), Some("web"));
        assert_eq!(record.ports.len(), 2);
        assert_eq!(record.ports[0].protocol, Protocol::Tcp);
        assert_eq!(record.ports[0].target_port, Some(PortRef::Name("http-alt".to_string())));
        assert_eq!(record.ports[1].protocol, Protocol::Udp);
        assert_eq!(record.ports[1].target_port, Some(PortRef::Number(5353)));
    }

    #[test]
    fn test_service_without_namespace_rejected() {
        let svc = service(json!({ "metadata": { "name": "web" } }));
        assert!(matches!(
            service_record(&svc),
            Err(ClusterError::MissingField("metadata.namespace"))
        ));
    }

    #[test]
    fn test_network_policy_record() {
        let np = policy(json!({
            "metadata": { "name": "allow-web", "namespace": "ns1" },
            "spec": {
                "podSelector": { "matchLabels": { "app": "web" } },
                "ingress": [{
                    "from": [
                        { "ipBlock": { "cidr": "10.0.0.0/8", "except": ["10.1.0.0/16"] } },
                        { "namespaceSelector": { "matchExpressions": [
                            { "key": "kubernetes.io/metadata.name", "operator": "In", "values": ["monitoring"] }
                        ] } }
                    ],
                    "ports": [{ "port": 8080 }, { "protocol": "TCP", "port": 9000, "endPort": 9100 }]
                }]
            }
        }));

        let record = network_policy_record(&np).unwrap();

        assert!(record.applies_ingress);
        assert!(!record.applies_egress);
        assert_eq!(record.ingress.len(), 1);
        let rule = &record.ingress[0];
        assert_eq!(rule.peers.len(), 2);
        assert!(matches!(rule.peers[0], Peer::IpBlock { .. }));
        assert!(matches!(
            rule.peers[1],
            Peer::Selector { pod_selector: None, namespace_selector: Some(_) }
        ));
        assert_eq!(rule.ports[1].end_port, Some(9100));
    }

    #[test]
    fn test_policy_types_default_from_egress_section() {
        let np = policy(json!({
            "metadata": { "name": "egress", "namespace": "ns1" },
            "spec": { "podSelector": {}, "egress": [{}] }
        }));

        let record = network_policy_record(&np).unwrap();

        assert!(record.applies_ingress);
        assert!(record.applies_egress);
        assert!(record.pod_selector.is_empty());
        assert_eq!(record.egress, vec![PolicyRule::default()]);
    }

    #[test]
    fn test_explicit_egress_only_policy() {
        let np = policy(json!({
            "metadata": { "name": "egress", "namespace": "ns1" },
            "spec": { "podSelector": {}, "policyTypes": ["Egress"] }
        }));

        let record = network_policy_record(&np).unwrap();

        assert!(!record.applies_ingress);
        assert!(record.applies_egress);
        assert!(record.egress.is_empty());
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        let np = policy(json!({
            "metadata": { "name": "bad", "namespace": "ns1" },
            "spec": { "podSelector": {}, "ingress": [{ "from": [{ "ipBlock": { "cidr": "not-a-cidr" } }] }] }
        }));

        match network_policy_record(&np) {
            Err(ClusterError::InvalidObject { key, source }) => {
                assert_eq!(key, "ns1/bad");
                assert_eq!(source, RuleError::InvalidCidr("not-a-cidr".to_string()));
            }
            other => panic!("expected InvalidObject, got {other:?}"),
        }
    }
}
