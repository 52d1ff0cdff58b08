//! Client error types.
//!
//! Connection errors are recovered inside the client by reconnecting; only
//! configuration, startup and caller-visible protocol errors reach callers.

use std::io::ErrorKind as IoErrorKind;
use std::time::Duration;

use agentlink_wire::WireError;
use thiserror::Error;

/// Failure of a single transport operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnError {
    /// Operation on a transport with no live connection.
    #[error("not connected")]
    NotConnected,

    /// Connecting to the agent failed.
    #[error("dial {host} failed: {kind:?} ({reason})")]
    Dial {
        host: String,
        kind: IoErrorKind,
        reason: String,
    },

    /// Writing to the connection failed.
    #[error("write failed: {kind:?} ({reason})")]
    Write { kind: IoErrorKind, reason: String },

    /// Write did not finish before its deadline.
    #[error("write timed out after {timeout:?}")]
    WriteTimeout { timeout: Duration },

    /// Reading from the connection failed.
    #[error("read failed: {kind:?} ({reason})")]
    Read { kind: IoErrorKind, reason: String },

    /// Agent closed the connection.
    #[error("connection closed by agent")]
    Eof,

    /// Connection was closed locally while the operation was pending.
    #[error("connection closed locally")]
    Closed,
}

impl ConnError {
    /// Create a Dial error from std::io::Error
    pub fn dial(host: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Dial {
            host: host.into(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    /// Create a Write error from std::io::Error
    pub fn write(err: &std::io::Error) -> Self {
        Self::Write {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    /// Create a Read error from std::io::Error
    pub fn read(err: &std::io::Error) -> Self {
        Self::Read {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

/// Result type for transport operations
pub type ConnResult<T> = Result<T, ConnError>;

/// Errors surfaced by [`crate::ProtocolClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Construction parameters are invalid; the client must not be used.
    #[error("invalid client configuration: {reason}")]
    Configuration { reason: String },

    /// Every dial attempt failed.
    #[error("agent unreachable after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: ConnError },

    #[error("client already started")]
    AlreadyStarted,

    /// The client has been closed and no longer accepts messages.
    #[error("client is closed")]
    Closed,

    /// The agent did not report its identity in time.
    #[error("agent info not available after {waited:?}")]
    AgentInfoTimeout { waited: Duration },

    #[error(transparent)]
    Connection(#[from] ConnError),

    #[error(transparent)]
    Protocol(#[from] WireError),
}

impl ClientError {
    /// Create a Configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
