//! Label selector matching.
//!
//! Implements the Kubernetes `LabelSelector` semantics used by NetworkPolicy
//! pod and namespace selectors: every `matchLabels` pair and every
//! `matchExpressions` requirement must hold. An empty selector matches
//! everything.

use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Label map, ordered so selectors and records compare deterministically.
pub type Map = BTreeMap<String, String>;

/// Label every namespace carries with its own name.
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Set-based requirement operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl FromStr for Operator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            other => Err(RuleError::InvalidOperator(other.to_string())),
        }
    }
}

/// A single `matchExpressions` requirement.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: BTreeSet<String>,
}

impl Expression {
    /// Creates a requirement on `key`.
    pub fn new<I, S>(key: impl Into<String>, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => labels
                .get(&self.key)
                .is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// Label selector as used by NetworkPolicy `podSelector` and `namespaceSelector`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub match_labels: Map,
    #[serde(default)]
    pub match_expressions: Vec<Expression>,
}

impl Selector {
    /// Selector that matches every label set.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector built from `matchLabels` only.
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            match_expressions: Vec::new(),
        }
    }

    /// Adds a `matchExpressions` requirement.
    #[must_use]
    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.match_expressions.push(expression);
        self
    }

    /// True when the selector has neither labels nor expressions.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Returns whether `labels` satisfies this selector.
    pub fn matches(&self, labels: &Map) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|e| e.matches(labels))
    }
}

/// Synthetic labels for a namespace known only by name.
pub fn namespace_labels(namespace: &str) -> Map {
    let mut labels = Map::new();
    labels.insert(NAMESPACE_NAME_LABEL.to_string(), namespace.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Map {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in [
            (Selector::default(), Map::new(), true, "empty match"),
            (
                Selector::from_labels([("app", "web")]),
                labels(&[("app", "web")]),
                true,
                "exact label match",
            ),
            (
                Selector::from_labels([("app", "web")]),
                labels(&[("app", "web"), ("tier", "frontend")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_labels([("app", "web")]),
                labels(&[("app", "db")]),
                false,
                "label value mismatch",
            ),
            (
                Selector::from_labels([("app", "web")]),
                Map::new(),
                false,
                "missing label",
            ),
            (
                Selector::default().with_expression(Expression::new("app", Operator::In, ["web", "api"])),
                labels(&[("app", "api")]),
                true,
                "in expression match",
            ),
            (
                Selector::default().with_expression(Expression::new("app", Operator::NotIn, ["web"])),
                Map::new(),
                true,
                "not-in with absent key",
            ),
            (
                Selector::default().with_expression(Expression::new("app", Operator::NotIn, ["web"])),
                labels(&[("app", "web")]),
                false,
                "not-in excluded value",
            ),
            (
                Selector::default().with_expression(Expression::new("app", Operator::Exists, Vec::<String>::new())),
                labels(&[("app", "anything")]),
                true,
                "exists",
            ),
            (
                Selector::default().with_expression(Expression::new("app", Operator::DoesNotExist, Vec::<String>::new())),
                labels(&[("app", "anything")]),
                false,
                "does-not-exist",
            ),
        ] {
            assert_eq!(selector.matches(&labels), matches, "{}", msg);
        }
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!("NotIn".parse::<Operator>(), Ok(Operator::NotIn));
        assert_eq!(
            "Like".parse::<Operator>(),
            Err(RuleError::InvalidOperator("Like".to_string()))
        );
    }

    #[test]
    fn test_namespace_selector_by_name() {
        let selector = Selector::from_labels([(NAMESPACE_NAME_LABEL, "ns1")]);
        assert!(selector.matches(&namespace_labels("ns1")));
        assert!(!selector.matches(&namespace_labels("ns2")));
    }
}
