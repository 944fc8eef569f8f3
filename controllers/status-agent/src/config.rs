//! Agent configuration from environment variables.

use crate::error::ControllerError;
use std::env;
use std::time::Duration;

const DEFAULT_ADDON_NAME: &str = "status";
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_HUB_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 60;

/// Resolved agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Path to the hub kubeconfig
    pub hub_kubeconfig: String,
    /// Managed cluster name; also the hub namespace holding its records
    pub cluster_name: String,
    pub addon_name: String,
    pub workers: usize,
    /// Upper bound on every hub call
    pub hub_request_timeout: Duration,
    pub cache_sync_timeout: Duration,
}

impl AgentConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which returns `None` for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hub_kubeconfig = required(&lookup, "HUB_KUBECONFIG")?;
        let cluster_name = required(&lookup, "CLUSTER_NAME")?;
        let addon_name = lookup("ADDON_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADDON_NAME.to_string());

        let workers = parse_or(&lookup, "STATUS_AGENT_WORKERS", DEFAULT_WORKERS)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "STATUS_AGENT_WORKERS must be at least 1".to_string(),
            ));
        }

        let hub_timeout = parse_or(&lookup, "HUB_REQUEST_TIMEOUT_SECS", DEFAULT_HUB_REQUEST_TIMEOUT_SECS)?;
        let sync_timeout = parse_or(&lookup, "CACHE_SYNC_TIMEOUT_SECS", DEFAULT_CACHE_SYNC_TIMEOUT_SECS)?;

        Ok(Self {
            hub_kubeconfig,
            cluster_name,
            addon_name,
            workers,
            hub_request_timeout: Duration::from_secs(hub_timeout),
            cache_sync_timeout: Duration::from_secs(sync_timeout),
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ControllerError::InvalidConfig(format!("{} environment variable is required", key)))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{} has invalid value {:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("HUB_KUBECONFIG", "/etc/hub/kubeconfig"),
            ("CLUSTER_NAME", "cluster1"),
        ]))
        .unwrap();

        assert_eq!(config.addon_name, "status");
        assert_eq!(config.workers, 4);
        assert_eq!(config.hub_request_timeout, Duration::from_secs(120));
        assert_eq!(config.cache_sync_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("HUB_KUBECONFIG", "/k"),
            ("CLUSTER_NAME", "edge-7"),
            ("ADDON_NAME", "status-addon"),
            ("STATUS_AGENT_WORKERS", "8"),
            ("HUB_REQUEST_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.cluster_name, "edge-7");
        assert_eq!(config.addon_name, "status-addon");
        assert_eq!(config.workers, 8);
        assert_eq!(config.hub_request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_cluster_name() {
        let err = AgentConfig::from_lookup(lookup(&[("HUB_KUBECONFIG", "/k")])).unwrap_err();
        assert!(err.to_string().contains("CLUSTER_NAME"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = AgentConfig::from_lookup(lookup(&[
            ("HUB_KUBECONFIG", "/k"),
            ("CLUSTER_NAME", "c"),
            ("STATUS_AGENT_WORKERS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_unparsable_timeout_rejected() {
        let err = AgentConfig::from_lookup(lookup(&[
            ("HUB_KUBECONFIG", "/k"),
            ("CLUSTER_NAME", "c"),
            ("CACHE_SYNC_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CACHE_SYNC_TIMEOUT_SECS"));
    }
}
