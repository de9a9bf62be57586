//! Firewall Rules
//!
//! Rule model and assembly logic for the firewall policy controller.
//!
//! The crate is pure: it performs no I/O. Callers hand it a snapshot of
//! Services and NetworkPolicies and receive a canonical [`FirewallRuleSet`].
//!
//! # Example
//!
//! ```
//! use firewall_rules::{assemble, FirewallRuleSet};
//!
//! let rules: FirewallRuleSet = assemble(&[], &[]);
//! assert!(rules.is_empty());
//! assert_eq!(rules.render(), "");
//! ```
//!
//! # Modules
//!
//! - **labels**: Kubernetes label selector matching
//! - **records**: Read-only snapshots of Services and NetworkPolicies
//! - **rule**: `FirewallRule`, `FirewallRuleSet` and their canonical rendering
//! - **assemble**: Resolution of policy selectors against services

pub mod assemble;
pub mod error;
pub mod labels;
pub mod records;
pub mod rule;

pub use assemble::assemble;
pub use error::RuleError;
pub use labels::{Expression, Map, Operator, Selector};
pub use records::*;
pub use rule::*;
