//! Codec errors
//!
//! Every codec error is a protocol error: it is reported to the caller
//! synchronously and never touches a connection.

use thiserror::Error;

/// Wire codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Adding a metadata pair would exceed the metadata region capacity.
    ///
    /// The message is left unchanged.
    #[error(
        "metadata ({key_len}, {value_len}) is too large: {used} of {capacity} bytes already used"
    )]
    MetadataOverflow {
        /// Length of the rejected key
        key_len: usize,
        /// Length of the rejected value
        value_len: usize,
        /// Bytes of the region already in use
        used: u32,
        /// Region capacity
        capacity: u32,
    },

    /// Fewer bytes were supplied than the frame declares.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Frame carries a different message type than the decoder expects.
    #[error("unexpected message type {msg_type:#x} (expected {expected:#x})")]
    UnexpectedKind {
        /// Type found in the header
        msg_type: u32,
        /// Type the decoder handles
        expected: u32,
    },

    /// Metadata region is internally inconsistent.
    #[error("malformed metadata region: {reason}")]
    MalformedMetadata {
        /// What was wrong
        reason: String,
    },

    /// Agent info body is not a valid self-describing record.
    #[error("invalid agent info body: {reason}")]
    InvalidAgentInfo {
        /// Decoder error message
        reason: String,
    },

    /// Incoming body length exceeds what the client will buffer.
    #[error("incoming body of {length} bytes exceeds maximum of {max} bytes")]
    BodyTooLarge {
        /// Declared body length
        length: u32,
        /// Maximum accepted length
        max: u32,
    },
}

impl WireError {
    /// Create a Truncated error
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }

    /// Create an UnexpectedKind error
    pub fn unexpected_kind(msg_type: u32, expected: u32) -> Self {
        Self::UnexpectedKind { msg_type, expected }
    }

    /// Create a MalformedMetadata error
    pub fn malformed_metadata(reason: impl Into<String>) -> Self {
        Self::MalformedMetadata {
            reason: reason.into(),
        }
    }

    /// Create an InvalidAgentInfo error
    pub fn invalid_agent_info(reason: impl Into<String>) -> Self {
        Self::InvalidAgentInfo {
            reason: reason.into(),
        }
    }
}

/// Result type for codec operations
pub type WireResult<T> = Result<T, WireError>;
