#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Agentlink
//!
//! Ships JSON events to the co-located collection agent and reports on
//! delivery quality.
//!
//! [`Output`] is the entry point. It owns an
//! [`agentlink_client::ProtocolClient`], an
//! [`agentlink_monitor::QualityMonitor`] counting what it hands over, and
//! optionally an [`agentlink_monitor::ResourceSampler`].
//!
//! The workspace crates are re-exported for direct use.

pub use agentlink_client;
pub use agentlink_monitor;
pub use agentlink_wire;

mod config;
mod dataid;
mod error;
mod output;
mod sequence;

pub use config::{AgentlinkConfig, ENDPOINT_ENV};
pub use dataid::{DataIdError, parse_data_id, positive_data_id};
pub use error::{ConfigError, OutputError, OutputResult, SequenceError};
pub use output::{OP_DATA_FIELD, Output};
pub use sequence::{
    FileSequenceStore, MemorySequenceStore, SEQUENCE_KEY, SequenceCounter, SequenceStore,
};
