//! Monitor error types

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("already started")]
    AlreadyStarted,

    #[error("invalid monitor configuration: {reason}")]
    Configuration { reason: String },
}

impl MonitorError {
    /// Create a Configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// Result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;
