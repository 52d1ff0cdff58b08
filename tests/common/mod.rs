//! In-process agent listening on a Unix socket.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agentlink::AgentlinkConfig;
use agentlink::agentlink_client::ClientConfig;
use agentlink::agentlink_wire::{HEADER_LEN, Header, IncomingCommand, MessageKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

pub const AGENT_INFO: &str = r#"{"bizid": 3, "cloudid": 0, "ip": "10.10.0.1"}"#;

/// A data frame as the agent saw it.
#[derive(Debug, Clone)]
pub struct Received {
    /// Accept order of the connection it arrived on
    pub conn: usize,
    pub header: Header,
    pub frame: Vec<u8>,
}

impl Received {
    pub fn body(&self) -> &[u8] {
        &self.frame[HEADER_LEN..]
    }
}

async fn read_frame(stream: &mut UnixStream) -> Option<(Header, Vec<u8>)> {
    let mut frame = vec![0u8; HEADER_LEN];
    stream.read_exact(&mut frame).await.ok()?;
    let header = Header::decode(&frame).ok()?;
    frame.resize(HEADER_LEN + header.body_length as usize, 0);
    stream.read_exact(&mut frame[HEADER_LEN..]).await.ok()?;
    Some((header, frame))
}

/// Serve connections, answering config requests when `answer_config` is
/// set and forwarding every data frame.
pub fn spawn_agent(listener: UnixListener, answer_config: bool) -> mpsc::UnboundedReceiver<Received> {
    let (tx, rx) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let conn = accepted.fetch_add(1, Ordering::SeqCst);
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some((header, frame)) = read_frame(&mut stream).await {
                    if header.msg_type == MessageKind::RequestConfig.code() {
                        if answer_config {
                            let reply = IncomingCommand {
                                msg_type: MessageKind::RequestConfig.code(),
                                body_length: AGENT_INFO.len() as u32,
                            };
                            stream.write_all(&reply.encode()).await.unwrap();
                            stream.write_all(AGENT_INFO.as_bytes()).await.unwrap();
                        }
                        continue;
                    }
                    let _ = tx.send(Received { conn, header, frame });
                }
            });
        }
    });
    rx
}

/// Config pointing at `socket`, with short retry pacing.
pub fn config_for(socket: &Path) -> AgentlinkConfig {
    AgentlinkConfig {
        client: ClientConfig::new()
            .with_endpoint(socket.to_string_lossy())
            .with_retry_interval(Duration::from_millis(20)),
        name: "beat".to_owned(),
        agent_info_timeout_secs: 5,
        ..AgentlinkConfig::default()
    }
}

pub async fn next_frame(frames: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("agent received nothing")
        .expect("agent stopped")
}
