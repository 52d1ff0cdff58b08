//! Configuration for the output layer.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) gives a working setup against the standard agent socket.
//!
//! ```toml
//! name = "beat"
//! data_id = 1001
//! monitor_id = 295
//!
//! [client]
//! endpoint = "/usr/local/gse/gseagent/ipc.state.report"
//! retry_times = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use agentlink_client::ClientConfig;
use agentlink_monitor::{MonitorConfig, SamplerConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding `client.endpoint`.
pub const ENDPOINT_ENV: &str = "AGENTLINK_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentlinkConfig {
    #[serde(default)]
    pub client: ClientConfig,

    /// Data id quality summaries go to; `<= 0` disables them.
    #[serde(default = "default_monitor_id")]
    pub monitor_id: i32,

    /// Data id resource samples go to; `<= 0` disables sampling.
    #[serde(default)]
    pub resource_id: i32,

    /// Name of this producer, used as the monitor's uniq type.
    #[serde(default = "default_name")]
    pub name: String,

    /// Stream the bundled binary publishes its heartbeat events on.
    #[serde(default)]
    pub data_id: i32,

    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Where the event sequence number is persisted. In memory when unset.
    #[serde(default)]
    pub sequence_path: Option<PathBuf>,

    #[serde(default = "default_agent_info_timeout_secs")]
    pub agent_info_timeout_secs: u64,
}

const fn default_monitor_id() -> i32 {
    295
}

fn default_name() -> String {
    "agentlink".to_owned()
}

const fn default_period_secs() -> u64 {
    10
}

const fn default_agent_info_timeout_secs() -> u64 {
    10
}

impl Default for AgentlinkConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            monitor_id: default_monitor_id(),
            resource_id: 0,
            name: default_name(),
            data_id: 0,
            period_secs: default_period_secs(),
            sequence_path: None,
            agent_info_timeout_secs: default_agent_info_timeout_secs(),
        }
    }
}

impl AgentlinkConfig {
    /// Read and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] for malformed TOML, and
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply [`ENDPOINT_ENV`] if set and non-empty.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.is_empty() {
                self.client.endpoint = Some(endpoint);
            }
        }
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty name, a zero period or
    /// agent info timeout, or an invalid client section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name must not be empty"));
        }
        if self.period_secs == 0 {
            return Err(ConfigError::invalid("period_secs must be greater than 0"));
        }
        if self.agent_info_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "agent_info_timeout_secs must be greater than 0",
            ));
        }
        self.client
            .validate()
            .map_err(|e| ConfigError::invalid(format!("client: {e}")))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::default().with_target_id(self.monitor_id)
    }

    pub const fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig::new(self.resource_id)
    }

    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub const fn agent_info_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_info_timeout_secs)
    }
}
