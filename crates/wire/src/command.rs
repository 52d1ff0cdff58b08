//! Header of frames the agent sends to the client.

use bytes::Buf;

use crate::{COMMAND_HEADER_LEN, MAX_INCOMING_BODY, MessageKind, WireError, WireResult};

/// The only header the client reads from the agent.
///
/// Every incoming frame is this 8-byte header followed by `body_length`
/// bytes of body, which must be consumed even when the type is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingCommand {
    pub msg_type: u32,
    pub body_length: u32,
}

impl IncomingCommand {
    /// Decode the command header.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] for fewer than 8 bytes and
    /// [`WireError::BodyTooLarge`] when the declared body exceeds
    /// [`MAX_INCOMING_BODY`].
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        if bytes.len() < COMMAND_HEADER_LEN {
            return Err(WireError::truncated(COMMAND_HEADER_LEN, bytes.len()));
        }
        let mut cur = bytes;
        let cmd = Self {
            msg_type: cur.get_u32(),
            body_length: cur.get_u32(),
        };
        if cmd.body_length > MAX_INCOMING_BODY {
            return Err(WireError::BodyTooLarge {
                length: cmd.body_length,
                max: MAX_INCOMING_BODY,
            });
        }
        Ok(cmd)
    }

    /// Encode the header, as the agent would.
    #[must_use]
    pub fn encode(&self) -> [u8; COMMAND_HEADER_LEN] {
        let mut out = [0u8; COMMAND_HEADER_LEN];
        let (ty, len) = out.split_at_mut(4);
        ty.copy_from_slice(&self.msg_type.to_be_bytes());
        len.copy_from_slice(&self.body_length.to_be_bytes());
        out
    }

    /// Whether the frame answers a configuration request.
    #[must_use]
    pub const fn is_config_response(&self) -> bool {
        self.msg_type == MessageKind::RequestConfig.code()
    }
}
