//! Firewall rule model.
//!
//! A [`FirewallRuleSet`] is an ordered, deduplicated set of [`FirewallRule`]s.
//! Ordering comes from the derived `Ord` on [`FirewallRule`] (destination,
//! port, protocol, source), so the textual rendering is a pure function of
//! the set's content: two sets built from the same rules in any order render
//! byte-identically.

use crate::records::Protocol;
use ipnet::IpNet;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Rule verdict. NetworkPolicies only ever allow traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Allow,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
        }
    }
}

/// Source or destination of a rule.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Endpoint {
    Service { namespace: String, name: String },
    Cidr { net: IpNet, except: Vec<IpNet> },
    Any,
}

impl Endpoint {
    /// Endpoint for the Service `namespace/name`.
    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Service {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// CIDR endpoint, normalized to its network address with sorted,
    /// deduplicated exceptions.
    pub fn cidr(net: IpNet, except: impl IntoIterator<Item = IpNet>) -> Self {
        let except: BTreeSet<IpNet> = except.into_iter().map(|n| n.trunc()).collect();
        Self::Cidr {
            net: net.trunc(),
            except: except.into_iter().collect(),
        }
    }

    /// Returns whether this endpoint is the Service `namespace/name`.
    pub fn is_service(&self, namespace: &str, name: &str) -> bool {
        matches!(self, Self::Service { namespace: ns, name: n } if ns == namespace && n == name)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service { namespace, name } => write!(f, "{namespace}/{name}"),
            Self::Cidr { net, except } => {
                write!(f, "{net}")?;
                if !except.is_empty() {
                    let list: Vec<String> = except.iter().map(ToString::to_string).collect();
                    write!(f, " except [{}]", list.join(", "))?;
                }
                Ok(())
            }
            Self::Any => f.write_str("any"),
        }
    }
}

/// Destination port selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSpec {
    Single(u16),
    Range { start: u16, end: u16 },
    Any,
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(port) => write!(f, "{port}"),
            Self::Range { start, end } => write!(f, "{start}-{end}"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// One allow rule.
///
/// Field order defines the canonical ordering: destination, then port,
/// then protocol, then source. Direction is implied by the endpoints, so an
/// ingress and an egress rule describing the same flow compare equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FirewallRule {
    pub destination: Endpoint,
    pub port: PortSpec,
    pub protocol: Protocol,
    pub source: Endpoint,
    pub action: Action,
}

impl FirewallRule {
    /// Creates an allow rule.
    pub fn allow(source: Endpoint, destination: Endpoint, port: PortSpec, protocol: Protocol) -> Self {
        Self {
            destination,
            port,
            protocol,
            source,
            action: Action::Allow,
        }
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}, src={}, dst={}, port={}, proto={}}}",
            self.action, self.source, self.destination, self.port, self.protocol
        )
    }
}

/// Assembled rule set. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FirewallRuleSet {
    rules: BTreeSet<FirewallRule>,
}

impl FirewallRuleSet {
    /// Builds a canonical set, dropping duplicates.
    pub fn from_rules(rules: impl IntoIterator<Item = FirewallRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Number of distinct rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rule was assembled.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &FirewallRule> {
        self.rules.iter()
    }

    /// Returns whether the set contains `rule`.
    pub fn contains(&self, rule: &FirewallRule) -> bool {
        self.rules.contains(rule)
    }

    /// Rules whose source or destination is the Service `namespace/name`.
    pub fn rules_for_service<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a FirewallRule> + 'a {
        self.rules.iter().filter(move |r| {
            r.destination.is_service(namespace, name) || r.source.is_service(namespace, name)
        })
    }

    /// Canonical text form: one rule per line, in canonical order.
    pub fn render(&self) -> String {
        self.rules
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Canonical JSON form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rules added and removed relative to `previous`.
    pub fn diff(&self, previous: &FirewallRuleSet) -> RuleSetDiff {
        RuleSetDiff {
            added: self.rules.difference(&previous.rules).cloned().collect(),
            removed: previous.rules.difference(&self.rules).cloned().collect(),
        }
    }
}

impl fmt::Display for FirewallRuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromIterator<FirewallRule> for FirewallRuleSet {
    fn from_iter<T: IntoIterator<Item = FirewallRule>>(iter: T) -> Self {
        Self::from_rules(iter)
    }
}

/// Difference between two rule sets, both sides in canonical order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSetDiff {
    pub added: Vec<FirewallRule>,
    pub removed: Vec<FirewallRule>,
}

impl RuleSetDiff {
    /// True when both sets hold the same rules.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
