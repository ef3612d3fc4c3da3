//! Operator configuration loaded from the environment.
//!
//! The controller reads this once at startup and copies the runner settings
//! into the env of every curator Job container, so both sides agree.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

const DEFAULT_IMAGE: &str = "quay.io/stolostron/cluster-curator-controller:latest";
const DEFAULT_RELEASE_IMAGE_REPO: &str = "quay.io/openshift-release-dev/ocp-release";

/// Environment variable names.
pub mod vars {
    /// Image used for curator Job containers.
    pub const IMAGE: &str = "CURATOR_IMAGE";
    /// Pull policy for curator Job containers.
    pub const IMAGE_PULL_POLICY: &str = "CURATOR_IMAGE_PULL_POLICY";
    /// Path of the operator binary inside the image.
    pub const BINARY: &str = "CURATOR_BINARY";
    /// Service account curator Jobs run as.
    pub const JOB_SERVICE_ACCOUNT: &str = "CURATOR_JOB_SERVICE_ACCOUNT";
    /// Namespace to watch; unset watches all namespaces.
    pub const WATCH_NAMESPACE: &str = "CURATOR_WATCH_NAMESPACE";
    /// Seconds between polls of monitored resources.
    pub const POLL_INTERVAL_SECONDS: &str = "CURATOR_POLL_INTERVAL_SECONDS";
    /// Minutes to wait for a cluster to finish provisioning.
    pub const ACTIVATE_TIMEOUT_MINUTES: &str = "CURATOR_ACTIVATE_TIMEOUT_MINUTES";
    /// Minutes to wait for cluster resources to be deleted.
    pub const DESTROY_TIMEOUT_MINUTES: &str = "CURATOR_DESTROY_TIMEOUT_MINUTES";
    /// Repository of release images for hosted cluster upgrades.
    pub const RELEASE_IMAGE_REPO: &str = "CURATOR_RELEASE_IMAGE_REPO";
    /// Log format.
    pub const LOG_FORMAT: &str = "CURATOR_LOG_FORMAT";
    /// Log level filter.
    pub const LOG_LEVEL: &str = "CURATOR_LOG_LEVEL";
}

/// Operator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Image for curator Job containers.
    pub image: String,
    /// Image pull policy for curator Job containers.
    pub image_pull_policy: String,
    /// Operator binary path inside the image.
    pub binary: String,
    /// Service account curator Jobs run as.
    pub job_service_account: String,
    /// Namespace to watch, `None` for all namespaces.
    pub watch_namespace: Option<String>,
    /// Interval between polls of monitored resources.
    pub poll_interval: Duration,
    /// Activation timeout in minutes.
    pub activate_timeout_minutes: u64,
    /// Destroy timeout in minutes.
    pub destroy_timeout_minutes: u64,
    /// Release image repository for hosted cluster upgrades.
    pub release_image_repo: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            binary: "/usr/local/bin/curator-operator".to_string(),
            job_service_account: "cluster-installer".to_string(),
            watch_namespace: None,
            poll_interval: Duration::from_secs(10),
            activate_timeout_minutes: 120,
            destroy_timeout_minutes: 60,
            release_image_repo: DEFAULT_RELEASE_IMAGE_REPO.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Create configuration from a variable lookup.
    ///
    /// Empty values are treated as unset. Numbers that do not parse fall back
    /// to the default with a warning.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            image: get(vars::IMAGE).unwrap_or(defaults.image),
            image_pull_policy: get(vars::IMAGE_PULL_POLICY).unwrap_or(defaults.image_pull_policy),
            binary: get(vars::BINARY).unwrap_or(defaults.binary),
            job_service_account: get(vars::JOB_SERVICE_ACCOUNT)
                .unwrap_or(defaults.job_service_account),
            watch_namespace: get(vars::WATCH_NAMESPACE),
            poll_interval: Duration::from_secs(parse_number(
                vars::POLL_INTERVAL_SECONDS,
                get(vars::POLL_INTERVAL_SECONDS),
                defaults.poll_interval.as_secs(),
            )),
            activate_timeout_minutes: parse_number(
                vars::ACTIVATE_TIMEOUT_MINUTES,
                get(vars::ACTIVATE_TIMEOUT_MINUTES),
                defaults.activate_timeout_minutes,
            ),
            destroy_timeout_minutes: parse_number(
                vars::DESTROY_TIMEOUT_MINUTES,
                get(vars::DESTROY_TIMEOUT_MINUTES),
                defaults.destroy_timeout_minutes,
            ),
            release_image_repo: get(vars::RELEASE_IMAGE_REPO)
                .unwrap_or(defaults.release_image_repo),
        }
    }

    /// Runner settings passed to curator Job containers.
    pub fn job_env(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            (
                vars::POLL_INTERVAL_SECONDS,
                self.poll_interval.as_secs().to_string(),
            ),
            (
                vars::ACTIVATE_TIMEOUT_MINUTES,
                self.activate_timeout_minutes.to_string(),
            ),
            (
                vars::DESTROY_TIMEOUT_MINUTES,
                self.destroy_timeout_minutes.to_string(),
            ),
            (vars::RELEASE_IMAGE_REPO, self.release_image_repo.clone()),
            (vars::LOG_FORMAT, "json".to_string()),
        ])
    }
}

fn parse_number(key: &str, value: Option<String>, default: u64) -> u64 {
    match value {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!(
                    variable = key,
                    value = %raw,
                    default = default,
                    "Ignoring invalid number in environment"
                );
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> OperatorConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_vars(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        assert_eq!(config_from(&[]), OperatorConfig::default());
    }

    #[test]
    fn overrides_from_environment() {
        let config = config_from(&[
            (vars::IMAGE, "registry.local/curator:1.0"),
            (vars::WATCH_NAMESPACE, "clusters"),
            (vars::POLL_INTERVAL_SECONDS, "3"),
            (vars::DESTROY_TIMEOUT_MINUTES, "15"),
        ]);
        assert_eq!(config.image, "registry.local/curator:1.0");
        assert_eq!(config.watch_namespace.as_deref(), Some("clusters"));
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.destroy_timeout_minutes, 15);
        assert_eq!(config.activate_timeout_minutes, 120);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config_from(&[
            (vars::POLL_INTERVAL_SECONDS, "soon"),
            (vars::ACTIVATE_TIMEOUT_MINUTES, "0"),
            (vars::WATCH_NAMESPACE, "  "),
        ]);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.activate_timeout_minutes, 120);
        assert_eq!(config.watch_namespace, None);
    }

    #[test]
    fn job_env_round_trips_runner_settings() {
        let config = OperatorConfig {
            activate_timeout_minutes: 30,
            ..Default::default()
        };
        let env = config.job_env();
        let back = OperatorConfig::from_vars(|key| env.get(key).cloned());
        assert_eq!(back.activate_timeout_minutes, 30);
        assert_eq!(back.poll_interval, config.poll_interval);
        assert_eq!(env.get(vars::LOG_FORMAT).map(String::as_str), Some("json"));
    }
}
