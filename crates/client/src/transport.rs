//! Stream transport to the agent
//!
//! A [`Transport`] owns at most one connection at a time. All methods take
//! `&self` so the sender, receiver and reconnect paths can share one
//! transport; the halves of the stream sit behind separate locks so a
//! blocked read never holds up a write.
//!
//! # Platform selection
//! - POSIX: Unix domain socket ([`UnixEndpoint`])
//! - Elsewhere: TCP loopback ([`TcpEndpoint`])
//!
//! [`AgentTransport`] names the transport for the current platform.

use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::{ConnError, ConnResult};

/// Byte stream to the agent.
///
/// # Contract
/// - `dial` replaces any existing connection
/// - `read` returning `Ok(0)` means the agent closed the connection
/// - `close` wakes every pending `read` and `write` with [`ConnError::Closed`]
/// - `close` on a closed transport is a no-op
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the configured host.
    async fn dial(&self) -> ConnResult<()>;

    /// Write all of `bytes`. A zero `timeout` means no deadline.
    async fn write(&self, bytes: &[u8], timeout: Duration) -> ConnResult<usize>;

    /// Read up to `buf.len()` bytes.
    async fn read(&self, buf: &mut [u8]) -> ConnResult<usize>;

    /// Drop the current connection, if any.
    async fn close(&self);

    /// Change the address used by subsequent dials.
    fn set_host(&mut self, host: &str);

    fn host(&self) -> &str;

    /// Unconnected transport pointing at the same host.
    fn fresh(&self) -> Self
    where
        Self: Sized;
}

/// Address family a [`SocketTransport`] connects through.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Address used when none is configured.
    const DEFAULT_HOST: &'static str;

    async fn connect(host: &str) -> io::Result<Self::Stream>;
}

/// Unix domain socket endpoint.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixEndpoint;

#[cfg(unix)]
#[async_trait]
impl Endpoint for UnixEndpoint {
    type Stream = tokio::net::UnixStream;

    const DEFAULT_HOST: &'static str = "/usr/local/gse/gseagent/ipc.state.report";

    async fn connect(host: &str) -> io::Result<Self::Stream> {
        tokio::net::UnixStream::connect(host).await
    }
}

/// TCP loopback endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpEndpoint;

#[async_trait]
impl Endpoint for TcpEndpoint {
    type Stream = tokio::net::TcpStream;

    const DEFAULT_HOST: &'static str = "127.0.0.1:47000";

    async fn connect(host: &str) -> io::Result<Self::Stream> {
        let stream = tokio::net::TcpStream::connect(host).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Transport over a Unix domain socket.
#[cfg(unix)]
pub type UnixTransport = SocketTransport<UnixEndpoint>;

/// Transport over TCP.
pub type TcpTransport = SocketTransport<TcpEndpoint>;

/// Transport for the current platform.
#[cfg(unix)]
pub type AgentTransport = UnixTransport;

/// Transport for the current platform.
#[cfg(not(unix))]
pub type AgentTransport = TcpTransport;

/// Stream socket transport, generic over the address family.
pub struct SocketTransport<E: Endpoint> {
    host: String,
    reader: Mutex<Option<ReadHalf<E::Stream>>>,
    writer: Mutex<Option<WriteHalf<E::Stream>>>,
    connected: AtomicBool,
    /// Bumped on every close so pending operations can bail out.
    closed: watch::Sender<u64>,
    _endpoint: PhantomData<fn() -> E>,
}

impl<E: Endpoint> SocketTransport<E> {
    /// Create an unconnected transport for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        let (closed, _) = watch::channel(0);
        Self {
            host: host.into(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed,
            _endpoint: PhantomData,
        }
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Run `op` unless the connection is closed first.
    ///
    /// The close subscription is taken before the connected check so a close
    /// racing with the start of `op` is never missed.
    async fn until_closed<T, F>(&self, op: F) -> ConnResult<T>
    where
        F: Future<Output = ConnResult<T>>,
    {
        let mut closed = self.closed.subscribe();
        if !self.is_connected() {
            return Err(ConnError::NotConnected);
        }

        tokio::select! {
            result = op => result,
            _ = closed.changed() => Err(ConnError::Closed),
        }
    }
}

impl<E: Endpoint> Default for SocketTransport<E> {
    fn default() -> Self {
        Self::new(E::DEFAULT_HOST)
    }
}

impl<E: Endpoint> std::fmt::Debug for SocketTransport<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("host", &self.host)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Endpoint> Transport for SocketTransport<E> {
    /// Connect to the configured host.
    ///
    /// # Postconditions
    /// - Any previous connection is closed first
    /// - On success, reads and writes go to the new connection
    /// - On failure, the transport is left disconnected
    async fn dial(&self) -> ConnResult<()> {
        self.close().await;

        let stream = E::connect(&self.host)
            .await
            .map_err(|e| ConnError::dial(self.host.clone(), &e))?;
        let (read_half, write_half) = tokio::io::split(stream);

        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.connected.store(true, Ordering::Release);

        debug!(host = %self.host, "connected to agent");
        Ok(())
    }

    async fn write(&self, bytes: &[u8], timeout: Duration) -> ConnResult<usize> {
        let mut guard = self.writer.lock().await;
        self.until_closed(async {
            let stream = guard.as_mut().ok_or(ConnError::NotConnected)?;
            let io = async {
                stream.write_all(bytes).await?;
                stream.flush().await
            };

            if timeout.is_zero() {
                io.await.map_err(|e| ConnError::write(&e))?;
            } else {
                tokio::time::timeout(timeout, io)
                    .await
                    .map_err(|_| ConnError::WriteTimeout { timeout })?
                    .map_err(|e| ConnError::write(&e))?;
            }
            Ok(bytes.len())
        })
        .await
    }

    async fn read(&self, buf: &mut [u8]) -> ConnResult<usize> {
        let mut guard = self.reader.lock().await;
        self.until_closed(async {
            let stream = guard.as_mut().ok_or(ConnError::NotConnected)?;
            stream.read(buf).await.map_err(|e| ConnError::read(&e))
        })
        .await
    }

    /// Drop the current connection.
    ///
    /// # Postconditions
    /// - Pending reads and writes return [`ConnError::Closed`]
    /// - Both stream halves are released
    async fn close(&self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        self.closed.send_modify(|generation| *generation = generation.wrapping_add(1));

        self.writer.lock().await.take();
        self.reader.lock().await.take();

        if was_connected {
            debug!(host = %self.host, "connection closed");
        }
    }

    fn set_host(&mut self, host: &str) {
        host.clone_into(&mut self.host);
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn fresh(&self) -> Self {
        Self::new(self.host.clone())
    }
}
