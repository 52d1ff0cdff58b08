//! Agentlink wire - binary frame codec for the local agent IPC protocol
//!
//! This crate encodes the outbound message kinds a process ships to its
//! co-located agent and decodes the small command header the agent sends back.
//! It performs no I/O.
//!
//! # Outbound frame
//!
//! Every outbound message starts with the same 24-byte header. All header
//! fields are big-endian; payload and metadata bytes are copied verbatim.
//!
//! ```text
//! +----------+----------+---------------+-------------+-------------+-------------+
//! | msg_type | data_id  | utc_timestamp | body_length | reserved[0] | reserved[1] |
//! |   u32    |   i32    |      u32      |     u32     |     u32     |     u32     |
//! +----------+----------+---------------+-------------+-------------+-------------+
//! ```
//!
//! Dynamic messages extend the header with 24 more bytes, then a metadata
//! region of fixed capacity (408 bytes by default), then the payload:
//!
//! ```text
//! +-------+-------+----------+--------------+------------+----------------------+---------+
//! | index | flags | meta_len | meta_max_len | meta_count | metadata region      | payload |
//! |  u64  |  u32  |   u32    |     u32      |    u32     | (meta_max_len bytes) |         |
//! +-------+-------+----------+--------------+------------+----------------------+---------+
//! ```
//!
//! Each metadata entry is `key_len: u32, value_len: u32, key, value`; the
//! unused tail of the region is zero-filled.
//!
//! # Incoming frame
//!
//! ```text
//! +----------+-------------+--------------------+
//! | msg_type | body_length | body               |
//! |   u32    |     u32     | (body_length bytes)|
//! +----------+-------------+--------------------+
//! ```
//!
//! # Example
//!
//! ```rust
//! use agentlink_wire::{DynamicMessage, Message, DEFAULT_META_MAX_LEN, DYNAMIC_EXT_HEADER_LEN};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut msg = DynamicMessage::new(1001, b"{\"k\":1}".to_vec());
//! msg.add_meta("tag", "collector|beat|0|10.0.0.1|1700000000")?;
//!
//! let expected = 7 + DYNAMIC_EXT_HEADER_LEN + DEFAULT_META_MAX_LEN;
//! assert_eq!(msg.header().body_length, expected);
//!
//! let frame = Message::from(msg).encode();
//! let decoded = DynamicMessage::decode(&frame)?;
//! assert_eq!(decoded.meta("tag"), Some("collector|beat|0|10.0.0.1|1700000000"));
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod agent;
mod command;
mod error;
mod message;

pub use agent::{AgentInfo, complex_id};
pub use command::IncomingCommand;
pub use error::{WireError, WireResult};
pub use message::{DynamicMessage, Header, MessageKind, Message, MetaEntry};

/// Size of the common outbound header in bytes
pub const HEADER_LEN: usize = 24;

/// Size of the dynamic extended header (index .. meta_count) in bytes
pub const DYNAMIC_EXT_HEADER_LEN: u32 = 24;

/// Per-entry overhead of a metadata pair (key length + value length)
pub const META_ENTRY_OVERHEAD: u32 = 8;

/// Default capacity of the dynamic metadata region, `(8 + 128) * 3`
pub const DEFAULT_META_MAX_LEN: u32 = 408;

/// Size of the incoming command header in bytes
pub const COMMAND_HEADER_LEN: usize = 8;

/// Largest incoming body the client will buffer (1MB)
pub const MAX_INCOMING_BODY: u32 = 1_048_576;

/// Dynamic message flag marking a redundant (duplicated) report
pub const FLAG_REDUNDANCY: u32 = 0x01;
