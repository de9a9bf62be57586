//! Rule model errors

use thiserror::Error;

/// Errors raised while building records from cluster objects.
///
/// Assembly itself is infallible; these only surface when a raw value
/// (protocol, port, CIDR, selector operator) cannot be represented.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// Unknown transport protocol
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),

    /// Port outside 1-65535
    #[error("Invalid port: {0}")]
    InvalidPort(i64),

    /// CIDR block that does not parse
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Label selector operator outside In/NotIn/Exists/DoesNotExist
    #[error("Invalid selector operator: {0}")]
    InvalidOperator(String),
}
