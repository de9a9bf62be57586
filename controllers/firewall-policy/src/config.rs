//! Controller configuration.
//!
//! Every setting comes from an environment variable and has a default, so a
//! controller running in-cluster needs no configuration at all.

use crate::error::ControllerError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Path to an explicit kubeconfig; unset means in-cluster or default kubeconfig
pub const KUBECONFIG_VAR: &str = "FIREWALL_KUBECFG";
/// Per-list timeout in seconds
pub const FETCH_TIMEOUT_VAR: &str = "FIREWALL_FETCH_TIMEOUT_SECS";
/// First watch re-subscription delay in seconds
pub const BACKOFF_MIN_VAR: &str = "FIREWALL_WATCH_BACKOFF_MIN_SECS";
/// Cap on the watch re-subscription delay in seconds
pub const BACKOFF_MAX_VAR: &str = "FIREWALL_WATCH_BACKOFF_MAX_SECS";

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 60;

/// Runtime configuration of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub kubeconfig: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub watch_backoff_min_secs: u64,
    pub watch_backoff_max_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            watch_backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            watch_backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kubeconfig = lookup(KUBECONFIG_VAR)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let fetch_timeout = seconds(&lookup, FETCH_TIMEOUT_VAR, DEFAULT_FETCH_TIMEOUT_SECS)?;
        let watch_backoff_min_secs = seconds(&lookup, BACKOFF_MIN_VAR, DEFAULT_BACKOFF_MIN_SECS)?;
        let watch_backoff_max_secs = seconds(&lookup, BACKOFF_MAX_VAR, DEFAULT_BACKOFF_MAX_SECS)?;

        if fetch_timeout == 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "{} must be greater than zero",
                FETCH_TIMEOUT_VAR
            )));
        }
        if watch_backoff_min_secs == 0 || watch_backoff_min_secs > watch_backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "{} ({}) must be positive and not exceed {} ({})",
                BACKOFF_MIN_VAR, watch_backoff_min_secs, BACKOFF_MAX_VAR, watch_backoff_max_secs
            )));
        }

        Ok(Self {
            kubeconfig,
            fetch_timeout: Duration::from_secs(fetch_timeout),
            watch_backoff_min_secs,
            watch_backoff_max_secs,
        })
    }
}

fn seconds<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "{} must be a whole number of seconds, got {:?}",
                key, value
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.watch_backoff_min_secs, 1);
        assert_eq!(config.watch_backoff_max_secs, 60);
        assert!(config.kubeconfig.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            (KUBECONFIG_VAR, "/etc/firewall/kubeconfig"),
            (FETCH_TIMEOUT_VAR, "5"),
            (BACKOFF_MIN_VAR, "2"),
            (BACKOFF_MAX_VAR, "30"),
        ]))
        .unwrap();

        assert_eq!(config.kubeconfig, Some(PathBuf::from("/etc/firewall/kubeconfig")));
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.watch_backoff_min_secs, 2);
        assert_eq!(config.watch_backoff_max_secs, 30);
    }

    #[test]
    fn test_blank_kubeconfig_ignored() {
        let config = Config::from_lookup(lookup(&[(KUBECONFIG_VAR, "  ")])).unwrap();
        assert!(config.kubeconfig.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases: &[(&str, &str)] = &[
            (FETCH_TIMEOUT_VAR, "soon"),
            (FETCH_TIMEOUT_VAR, "0"),
            (BACKOFF_MIN_VAR, "-1"),
            (BACKOFF_MIN_VAR, "0"),
            (BACKOFF_MIN_VAR, "120"),
        ];

        for case in cases {
            let result = Config::from_lookup(lookup(&[*case]));
            assert!(
                matches!(result, Err(ControllerError::InvalidConfig(_))),
                "expected {:?} to be rejected",
                case
            );
        }
    }
}
