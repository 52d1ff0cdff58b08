//! Agentlink client - resilient connection to the co-located agent
//!
//! This crate owns the connection lifecycle for shipping frames built by
//! `agentlink-wire`:
//!
//! - [`Transport`]: one stream connection (Unix socket on POSIX, TCP otherwise)
//! - [`ProtocolClient`]: bounded outbound queue, reconnect on failure,
//!   periodic agent info refresh
//! - [`Reporter`]: operational records sent as Op messages over short-lived
//!   connections
//!
//! Transport failures are recovered inside the client. Callers only see
//! configuration errors, startup failure, and use after close.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod client;
mod config;
mod error;
mod reporter;
pub mod transport;

pub use client::{ConnectionState, ProtocolClient, WRITE_ATTEMPTS};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ConnError, ConnResult};
pub use reporter::{ReportError, Reporter};
#[cfg(unix)]
pub use transport::UnixTransport;
pub use transport::{AgentTransport, SocketTransport, TcpTransport, Transport};

use tokio::sync::watch;

/// Resolves once the stop flag is set (or its sender is gone).
///
/// Background tasks here and in `agentlink-monitor` race this against
/// their work in `select!`.
pub async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopping| *stopping).await;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stopped_waits_for_flag() {
        let (stop, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { stopped(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        stop.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_resolves_when_sender_dropped() {
        let (stop, mut rx) = watch::channel(false);
        drop(stop);
        tokio::time::timeout(Duration::from_secs(1), stopped(&mut rx))
            .await
            .unwrap();
    }
}
