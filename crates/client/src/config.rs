//! Configuration for the protocol client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ClientError, ClientResult};

/// Configuration for the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Dial attempts per connect or reconnect.
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Pause between dial attempts, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Capacity of the outbound queue; `send` blocks when it is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-write deadline in milliseconds. Zero disables the deadline.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Agent address overriding the platform default.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Interval between agent info requests, in seconds.
    #[serde(default = "default_agent_info_refresh_secs")]
    pub agent_info_refresh_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    /// Create a config with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            retry_times: 3,
            retry_interval_ms: 3_000,
            queue_capacity: 1,
            write_timeout_ms: 5_000,
            endpoint: None,
            agent_info_refresh_secs: 31,
        }
    }

    /// Set the dial attempts per connect.
    #[must_use]
    pub const fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    /// Set the pause between dial attempts.
    #[must_use]
    pub const fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the per-write deadline; zero disables it.
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Override the agent address.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the agent info request interval.
    #[must_use]
    pub const fn with_agent_info_refresh(mut self, interval: Duration) -> Self {
        self.agent_info_refresh_secs = interval.as_secs();
        self
    }

    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[must_use]
    pub const fn agent_info_refresh(&self) -> Duration {
        Duration::from_secs(self.agent_info_refresh_secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if a value would leave the
    /// client unable to connect or to queue messages.
    pub fn validate(&self) -> ClientResult<()> {
        if self.retry_times == 0 {
            return Err(ClientError::configuration(
                "retry_times must be greater than 0",
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ClientError::configuration(
                "queue_capacity must be greater than 0",
            ));
        }

        if self.agent_info_refresh_secs == 0 {
            return Err(ClientError::configuration(
                "agent_info_refresh_secs must be greater than 0",
            ));
        }

        if self.endpoint.as_deref().is_some_and(str::is_empty) {
            return Err(ClientError::configuration("endpoint must not be empty"));
        }

        Ok(())
    }
}

const fn default_retry_times() -> u32 {
    3
}

const fn default_retry_interval_ms() -> u64 {
    3_000
}

const fn default_queue_capacity() -> usize {
    1
}

const fn default_write_timeout_ms() -> u64 {
    5_000
}

const fn default_agent_info_refresh_secs() -> u64 {
    31
}
