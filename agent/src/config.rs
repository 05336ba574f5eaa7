//! Configuration management for an actor.

use fieldsync_engine::{DriftPolicy, RemoteSource, Topology};
use std::env;
use std::time::Duration;

/// Actor configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Actor name used in logs
    pub actor: String,
    /// Cell topology: devices use three sources, the app two
    pub topology: Topology,
    /// Slot fetched data is written into
    pub remote: RemoteSource,
    /// Upper bound on every collaborator call
    pub control_timeout: Duration,
    /// Drift tolerated before a manual time correction rebases the clock
    pub drift_policy: DriftPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            actor: "device".to_string(),
            topology: Topology::ThreeSource,
            remote: RemoteSource::Api,
            control_timeout: Duration::from_millis(5_000),
            drift_policy: DriftPolicy::APP_DEVICE,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let actor = lookup("FIELDSYNC_ACTOR").unwrap_or(defaults.actor);

        let topology = match lookup("FIELDSYNC_TOPOLOGY").as_deref() {
            None => defaults.topology,
            Some("two-source") => Topology::TwoSource,
            Some("three-source") => Topology::ThreeSource,
            Some(other) => return Err(ConfigError::InvalidTopology(other.to_string())),
        };

        let remote = match lookup("FIELDSYNC_REMOTE").as_deref() {
            None => defaults.remote,
            Some("api") => RemoteSource::Api,
            Some("local") => RemoteSource::Local,
            Some(other) => return Err(ConfigError::InvalidRemote(other.to_string())),
        };

        let control_timeout = match lookup("FIELDSYNC_CONTROL_TIMEOUT_MS") {
            None => defaults.control_timeout,
            Some(v) => match v.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => return Err(ConfigError::InvalidTimeout(v)),
            },
        };

        let drift_policy = match lookup("FIELDSYNC_DRIFT_THRESHOLD_MS") {
            None => defaults.drift_policy,
            Some(v) => DriftPolicy::new(
                v.parse()
                    .map_err(|_| ConfigError::InvalidDriftThreshold(v.clone()))?,
            ),
        };

        Ok(Self {
            actor,
            topology,
            remote,
            control_timeout,
            drift_policy,
        })
    }
}

/// Configuration errors.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid FIELDSYNC_TOPOLOGY value: {0}")]
    InvalidTopology(String),

    #[error("Invalid FIELDSYNC_REMOTE value: {0}")]
    InvalidRemote(String),

    #[error("Invalid FIELDSYNC_CONTROL_TIMEOUT_MS value: {0}")]
    InvalidTimeout(String),

    #[error("Invalid FIELDSYNC_DRIFT_THRESHOLD_MS value: {0}")]
    InvalidDriftThreshold(String),
}
