//! Operational data reporting
//!
//! [`Reporter`] is the seam between producers of operational records (the
//! quality monitor, the resource sampler) and the channel that ships them.
//! [`ProtocolClient`] implements it by sending an Op message over a private
//! connection, so operational traffic never queues behind data traffic.

use std::sync::Arc;

use agentlink_wire::Message;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use crate::ProtocolClient;
use crate::transport::Transport;

/// Errors returned synchronously by [`Reporter::report`].
///
/// Delivery failures are not errors here; they are logged by the reporter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("invalid report target {target_id}: must be positive")]
    InvalidTarget { target_id: i32 },

    #[error("report payload could not be serialized: {reason}")]
    Serialization { reason: String },
}

/// Sink for operational records addressed to a target id.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Ship `payload` to `target_id`.
    ///
    /// # Errors
    ///
    /// - [`ReportError::InvalidTarget`] if `target_id <= 0`
    /// - [`ReportError::Serialization`] if `payload` cannot be encoded
    async fn report(&self, target_id: i32, payload: serde_json::Value) -> Result<(), ReportError>;
}

#[async_trait]
impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    async fn report(&self, target_id: i32, payload: serde_json::Value) -> Result<(), ReportError> {
        (**self).report(target_id, payload).await
    }
}

#[async_trait]
impl<T: Transport> Reporter for ProtocolClient<T> {
    async fn report(&self, target_id: i32, payload: serde_json::Value) -> Result<(), ReportError> {
        if target_id <= 0 {
            return Err(ReportError::InvalidTarget { target_id });
        }

        let body = serde_json::to_vec(&payload).map_err(|e| ReportError::Serialization {
            reason: e.to_string(),
        })?;

        debug!(target_id, bytes = body.len(), "reporting operational data");
        if let Err(e) = self.send_with_new_connection(Message::op(target_id, body)).await {
            error!(target_id, error = %e, "operational report not delivered");
        }
        Ok(())
    }
}
