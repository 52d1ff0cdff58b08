//! Agent identity carried in the configuration response body.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{WireError, WireResult};

/// Identity the agent reports about the host it runs on.
///
/// An empty `ip` means the agent has not answered yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(rename = "bizid", alias = "Bizid", alias = "BizID", default)]
    pub business_id: i32,
    #[serde(rename = "cloudid", alias = "Cloudid", alias = "CloudID", default)]
    pub cloud_id: i32,
    #[serde(rename = "ip", alias = "IP", alias = "Ip", default)]
    pub ip: String,
}

impl AgentInfo {
    /// Decode a configuration response body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidAgentInfo`] when the body is not a JSON
    /// object of the expected shape.
    pub fn decode(body: &[u8]) -> WireResult<Self> {
        serde_json::from_slice(body).map_err(|e| WireError::invalid_agent_info(e.to_string()))
    }

    /// Whether the agent has reported its address.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !self.ip.is_empty()
    }

    /// Packed cloud/business identifier, see [`complex_id`].
    #[must_use]
    pub fn complex_id(&self) -> i64 {
        complex_id(self.cloud_id, self.business_id)
    }
}

impl fmt::Display for AgentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bizid={}, cloudid={}, ip={}",
            self.business_id, self.cloud_id, self.ip
        )
    }
}

/// `(cloud_id << 22) | (business_id & 0x3FFFFF)`, as produced by the agent.
#[must_use]
pub fn complex_id(cloud_id: i32, business_id: i32) -> i64 {
    (i64::from(cloud_id) << 22) | (i64::from(business_id) & 0x003F_FFFF)
}
