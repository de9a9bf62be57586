//! Read-only snapshots of the watched resource kinds.
//!
//! Records are fetched fresh on every reconciliation pass and never mutated.
//! They carry only the fields assembly needs.

use crate::error::RuleError;
use crate::labels::{Map, Selector};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource kinds the controller watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Service,
    NetworkPolicy,
}

impl ResourceKind {
    /// Both kinds, in a fixed order.
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Service, ResourceKind::NetworkPolicy];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str("Service"),
            Self::NetworkPolicy => f.write_str("NetworkPolicy"),
        }
    }
}

/// Transport protocol of a port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Every protocol a NetworkPolicy can name.
    pub const ALL: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Sctp];
}

impl FromStr for Protocol {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else if s.eq_ignore_ascii_case("sctp") {
            Ok(Self::Sctp)
        } else {
            Err(RuleError::InvalidProtocol(s.to_string()))
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Sctp => f.write_str("sctp"),
        }
    }
}

/// Converts a Kubernetes `int32` port into a `u16`, rejecting 0 and overflow.
pub fn port_number(value: i32) -> Result<u16, RuleError> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(RuleError::InvalidPort(i64::from(value)))
}

/// A port given either by number or by name (`IntOrString`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

/// One port exposed by a Service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: Protocol,
    pub target_port: Option<PortRef>,
}

impl ServicePort {
    /// TCP port with no name and no target port.
    pub fn tcp(port: u16) -> Self {
        Self {
            name: None,
            port,
            protocol: Protocol::Tcp,
            target_port: None,
        }
    }
}

/// Snapshot of a Service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub namespace: String,
    pub name: String,
    /// Metadata labels of the Service object itself
    pub labels: Map,
    /// `spec.selector`: labels of the pods the Service fronts
    pub selector: Map,
    pub ports: Vec<ServicePort>,
}

impl ServiceRecord {
    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Services without a selector (manual endpoints, ExternalName) front no pods.
    pub fn fronts_pods(&self) -> bool {
        !self.selector.is_empty()
    }
}

/// Port clause of a NetworkPolicy rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyPort {
    pub protocol: Protocol,
    /// `None` means every port of `protocol`
    pub port: Option<PortRef>,
    pub end_port: Option<u16>,
}

impl PolicyPort {
    /// Returns whether this clause admits traffic to the given service port.
    ///
    /// Numeric clauses match the service port or its numeric target port;
    /// named clauses match the port name or a named target port.
    pub fn admits(&self, service_port: &ServicePort) -> bool {
        if self.protocol != service_port.protocol {
            return false;
        }
        match &self.port {
            None => true,
            Some(PortRef::Number(start)) => {
                let end = self.end_port.unwrap_or(*start);
                let in_range = |p: u16| (*start..=end).contains(&p);
                in_range(service_port.port)
                    || matches!(service_port.target_port, Some(PortRef::Number(t)) if in_range(t))
            }
            Some(PortRef::Name(name)) => {
                service_port.name.as_deref() == Some(name.as_str())
                    || matches!(&service_port.target_port, Some(PortRef::Name(t)) if t == name)
            }
        }
    }
}

/// Peer clause of a NetworkPolicy rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Peer {
    IpBlock {
        cidr: IpNet,
        except: Vec<IpNet>,
    },
    Selector {
        /// `None` selects every pod of the chosen namespaces
        pod_selector: Option<Selector>,
        /// `None` restricts to the policy's own namespace
        namespace_selector: Option<Selector>,
    },
}

impl Peer {
    /// Parses an `ipBlock` peer.
    pub fn ip_block<I, S>(cidr: &str, except: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parse = |s: &str| -> Result<IpNet, RuleError> {
            s.parse::<IpNet>()
                .map_err(|_| RuleError::InvalidCidr(s.to_string()))
        };
        Ok(Self::IpBlock {
            cidr: parse(cidr)?,
            except: except
                .into_iter()
                .map(|s| parse(s.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// One ingress (`from`) or egress (`to`) rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Empty means every peer
    pub peers: Vec<Peer>,
    /// Empty means every port
    pub ports: Vec<PolicyPort>,
}

/// Snapshot of a NetworkPolicy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicyRecord {
    pub namespace: String,
    pub name: String,
    pub pod_selector: Selector,
    pub applies_ingress: bool,
    pub applies_egress: bool,
    pub ingress: Vec<PolicyRule>,
    pub egress: Vec<PolicyRule>,
}

impl NetworkPolicyRecord {
    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
