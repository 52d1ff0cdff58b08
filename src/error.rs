//! Error types for the output layer

use std::path::PathBuf;

use agentlink_client::ClientError;
use agentlink_monitor::MonitorError;
use agentlink_wire::WireError;
use thiserror::Error;

use crate::dataid::DataIdError;

/// Errors returned by [`crate::Output`].
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("event has no dataid field")]
    MissingDataId,

    #[error("invalid dataid: {0}")]
    InvalidDataId(#[from] DataIdError),

    #[error("event must be a JSON object")]
    NotAnObject,

    /// The agent has not reported its identity, so the event cannot be
    /// stamped with it.
    #[error("agent info is not available")]
    AgentInfoUnavailable,

    #[error("event serialization failed: {reason}")]
    Serialization { reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Protocol(#[from] WireError),
}

impl OutputError {
    pub(crate) fn serialization(err: &serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Errors loading or validating [`crate::AgentlinkConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("cannot parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Errors from a [`crate::SequenceStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("sequence store {path} I/O failed: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("sequence store {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl SequenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
