//! Long-lived protocol client
//!
//! [`ProtocolClient`] keeps one connection to the agent alive and runs three
//! background tasks once started:
//!
//! - **sender**: drains the outbound queue in FIFO order, retrying each
//!   message on write failure with a reconnect in between
//! - **receiver**: reads command frames and stores agent info responses
//! - **refresher**: requests agent info immediately and then periodically
//!
//! Every task observes the stop signal at each wait point, so [`close`]
//! returns only after all of them have exited.
//!
//! [`close`]: ProtocolClient::close

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use agentlink_wire::{AgentInfo, COMMAND_HEADER_LEN, IncomingCommand, Message};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::transport::{AgentTransport, Transport};
use crate::{ClientConfig, ClientError, ClientResult, ConnError, ConnResult, stopped};

/// Write attempts per queued message before it is abandoned.
pub const WRITE_ATTEMPTS: u32 = 3;

/// Connection lifecycle as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// State shared between the client handle and its background tasks.
struct Shared<T> {
    transport: T,
    config: ClientConfig,
    state: watch::Sender<ConnectionState>,
    agent_info: RwLock<AgentInfo>,
    /// Serializes reconnects.
    reconnect_lock: tokio::sync::Mutex<()>,
    /// Incremented after every successful reconnect.
    generation: AtomicU64,
    stop: watch::Sender<bool>,
}

impl<T: Transport> Shared<T> {
    fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Sleep for `period`, returning `false` if stop was signalled first.
    async fn pause(&self, period: Duration) -> bool {
        let mut stop = self.stop.subscribe();
        tokio::select! {
            () = tokio::time::sleep(period) => true,
            () = stopped(&mut stop) => false,
        }
    }

    /// Dial up to `retry_times` times with `retry_interval` between attempts.
    async fn connect_with_retry(&self) -> ClientResult<()> {
        let attempts = self.config.retry_times;
        let mut last = ConnError::NotConnected;
        self.state.send_replace(ConnectionState::Connecting);

        for attempt in 1..=attempts {
            if self.is_stopping() {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::Closed);
            }

            match self.transport.dial().await {
                Ok(()) => {
                    info!(host = %self.transport.host(), attempt, "connected to agent");
                    self.state.send_replace(ConnectionState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    warn!(host = %self.transport.host(), attempt, attempts, error = %e, "dial failed");
                    last = e;
                }
            }

            if attempt < attempts && !self.pause(self.config.retry_interval()).await {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::Closed);
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        Err(ClientError::ExhaustedRetries { attempts, last })
    }

    /// Reconnect unless someone already did since `seen` was observed.
    ///
    /// Concurrent failures on the same connection coalesce into one
    /// reconnect: the first caller redials, later callers see the bumped
    /// generation and return immediately.
    async fn reconnect(&self, seen: u64) -> ClientResult<()> {
        let _guard = self.reconnect_lock.lock().await;
        if self.generation() != seen {
            return Ok(());
        }

        warn!(host = %self.transport.host(), "reconnecting to agent");
        self.transport.close().await;
        self.connect_with_retry().await?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Write one frame, reconnecting after each failure.
    ///
    /// Returns `false` if the frame was abandoned.
    async fn deliver(&self, frame: &[u8]) -> bool {
        let timeout = self.config.write_timeout();

        for attempt in 1..=WRITE_ATTEMPTS {
            let seen = self.generation();
            match self.transport.write(frame, timeout).await {
                Ok(written) => {
                    debug!(bytes = written, "frame written");
                    return true;
                }
                Err(e) => {
                    if self.is_stopping() {
                        return false;
                    }
                    warn!(attempt, attempts = WRITE_ATTEMPTS, error = %e, "write to agent failed");
                    if let Err(e) = self.reconnect(seen).await {
                        error!(error = %e, "reconnect failed");
                        return false;
                    }
                }
            }
        }

        false
    }

    async fn send_loop(self: Arc<Self>, mut queue: mpsc::Receiver<Message>) {
        debug!("sender started");
        let mut stop = self.stop.subscribe();

        loop {
            let message = tokio::select! {
                biased;
                () = stopped(&mut stop) => break,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let frame = message.encode();
            if !self.deliver(&frame).await && !self.is_stopping() {
                error!(
                    kind = ?message.kind(),
                    data_id = message.header().data_id,
                    bytes = frame.len(),
                    "message abandoned"
                );
            }
        }

        debug!("sender stopped");
    }

    async fn receive_loop(self: Arc<Self>) {
        debug!("receiver started");
        let mut stop = self.stop.subscribe();

        loop {
            if self.is_stopping() {
                break;
            }

            let seen = self.generation();
            let frame = tokio::select! {
                () = stopped(&mut stop) => break,
                frame = self.read_frame() => frame,
            };

            match frame {
                Ok((command, body)) => self.handle_frame(command, &body),
                Err(e) => {
                    if self.is_stopping() {
                        break;
                    }
                    match e {
                        ClientError::Connection(ConnError::Eof) => {
                            warn!("agent closed the connection");
                        }
                        ClientError::Connection(ConnError::Closed) => {
                            debug!("read interrupted by reconnect");
                        }
                        other => warn!(error = %other, "receive failed"),
                    }
                    if let Err(e) = self.reconnect(seen).await {
                        error!(error = %e, "reconnect after receive failure failed");
                        if !self.pause(self.config.retry_interval()).await {
                            break;
                        }
                    }
                }
            }
        }

        debug!("receiver stopped");
    }

    async fn read_frame(&self) -> ClientResult<(IncomingCommand, Vec<u8>)> {
        let mut head = [0u8; COMMAND_HEADER_LEN];
        self.read_full(&mut head).await?;
        let command = IncomingCommand::decode(&head)?;

        let mut body = vec![0u8; command.body_length as usize];
        self.read_full(&mut body).await?;
        Ok((command, body))
    }

    async fn read_full(&self, buf: &mut [u8]) -> ConnResult<()> {
        let mut filled = 0;
        while let Some(rest) = buf.get_mut(filled..).filter(|rest| !rest.is_empty()) {
            let n = self.transport.read(rest).await?;
            if n == 0 {
                return Err(ConnError::Eof);
            }
            filled += n;
        }
        Ok(())
    }

    fn handle_frame(&self, command: IncomingCommand, body: &[u8]) {
        if !command.is_config_response() {
            debug!(
                msg_type = command.msg_type,
                bytes = body.len(),
                "ignoring frame"
            );
            return;
        }

        match AgentInfo::decode(body) {
            Ok(info) => {
                info!(%info, "agent info updated");
                match self.agent_info.write() {
                    Ok(mut current) => *current = info,
                    Err(poisoned) => *poisoned.into_inner() = info,
                }
            }
            Err(e) => warn!(error = %e, "discarding agent info response"),
        }
    }

    async fn refresh_loop(self: Arc<Self>, queue: mpsc::Sender<Message>) {
        debug!("agent info refresher started");
        let mut stop = self.stop.subscribe();
        let mut ticker = tokio::time::interval(self.config.agent_info_refresh());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = stopped(&mut stop) => break,
                _ = ticker.tick() => {}
            }

            debug!("requesting agent info");
            tokio::select! {
                () = stopped(&mut stop) => break,
                sent = queue.send(Message::request_config()) => {
                    if sent.is_err() {
                        warn!("agent info request not queued: client closed");
                        break;
                    }
                }
            }
        }

        debug!("agent info refresher stopped");
    }

    fn agent_info(&self) -> AgentInfo {
        match self.agent_info.read() {
            Ok(info) => info.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Resilient client for the agent IPC protocol.
///
/// # Example
/// ```rust,no_run
/// use agentlink_client::{ClientConfig, ProtocolClient};
/// use agentlink_wire::Message;
///
/// # async fn run() -> Result<(), agentlink_client::ClientError> {
/// let client = ProtocolClient::with_default_transport(ClientConfig::default())?;
/// client.start().await?;
/// client.send(Message::common(1001, b"hello".to_vec())).await?;
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ProtocolClient<T: Transport = AgentTransport> {
    shared: Arc<Shared<T>>,
    queue_tx: mpsc::Sender<Message>,
    queue_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProtocolClient<AgentTransport> {
    /// Create a client over the platform transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if `config` is invalid.
    pub fn with_default_transport(config: ClientConfig) -> ClientResult<Self> {
        Self::new(config, AgentTransport::default())
    }
}

impl<T: Transport> ProtocolClient<T> {
    /// Create a client over `transport`.
    ///
    /// # Preconditions
    /// - `config` passes [`ClientConfig::validate`]
    ///
    /// # Postconditions
    /// - No connection is made and no task runs until [`start`](Self::start)
    /// - A configured endpoint overrides the transport's host
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if `config` is invalid.
    pub fn new(config: ClientConfig, mut transport: T) -> ClientResult<Self> {
        config.validate()?;
        if let Some(endpoint) = config.endpoint.as_deref() {
            transport.set_host(endpoint);
        }

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (stop, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                config,
                state,
                agent_info: RwLock::new(AgentInfo::default()),
                reconnect_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                stop,
            }),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Connect to the agent and launch the background tasks.
    ///
    /// # Postconditions
    /// - On success: connected, sender/receiver/refresher running
    /// - On failure: exactly `retry_times` dials were made and no task runs
    ///
    /// # Errors
    ///
    /// - [`ClientError::ExhaustedRetries`] if every dial failed
    /// - [`ClientError::AlreadyStarted`] on a second call
    /// - [`ClientError::Closed`] if the client was closed meanwhile
    pub async fn start(&self) -> ClientResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyStarted);
        }

        if let Err(e) = self.shared.connect_with_retry().await {
            self.started.store(false, Ordering::Release);
            error!(host = %self.shared.transport.host(), error = %e, "could not connect to agent");
            return Err(e);
        }

        let queue = self
            .queue_rx
            .lock()
            .ok()
            .and_then(|mut queue| queue.take())
            .ok_or(ClientError::AlreadyStarted)?;

        let handles = vec![
            tokio::spawn(Arc::clone(&self.shared).send_loop(queue)),
            tokio::spawn(Arc::clone(&self.shared).receive_loop()),
            tokio::spawn(Arc::clone(&self.shared).refresh_loop(self.queue_tx.clone())),
        ];
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }

        info!(host = %self.shared.transport.host(), "protocol client started");
        Ok(())
    }

    /// Queue `message` for the sender task.
    ///
    /// Blocks while the queue is full. Delivery failures after this point
    /// are handled by the sender and never returned here.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the client has been closed.
    pub async fn send(&self, message: Message) -> ClientResult<()> {
        if self.shared.is_stopping() {
            return Err(ClientError::Closed);
        }
        self.queue_tx
            .send(message)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Deliver `message` over a private, short-lived connection.
    ///
    /// The shared connection is never touched. The message is written
    /// at most [`WRITE_ATTEMPTS`] times, redialling the private connection
    /// between attempts; the connection is closed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] with the last failure if the
    /// message could not be written.
    pub async fn send_with_new_connection(&self, message: Message) -> ClientResult<()> {
        let conn = self.shared.transport.fresh();
        let timeout = self.shared.config.write_timeout();
        let frame = message.encode();

        conn.dial().await?;

        let mut last = ConnError::NotConnected;
        for attempt in 1..=WRITE_ATTEMPTS {
            match conn.write(&frame, timeout).await {
                Ok(written) => {
                    debug!(kind = ?message.kind(), bytes = written, "frame written on private connection");
                    conn.close().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts = WRITE_ATTEMPTS, error = %e, "write on private connection failed");
                    last = e;
                }
            }

            if attempt < WRITE_ATTEMPTS {
                if let Err(e) = conn.dial().await {
                    warn!(error = %e, "redial of private connection failed");
                }
            }
        }

        conn.close().await;
        Err(ClientError::Connection(last))
    }

    /// Most recent agent info; all-default until the agent answers.
    pub fn agent_info(&self) -> AgentInfo {
        self.shared.agent_info()
    }

    /// Poll until the agent has reported its identity.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AgentInfoTimeout`] if no identity arrived
    /// within `ceiling`.
    pub async fn wait_for_agent_info(
        &self,
        poll: Duration,
        ceiling: Duration,
    ) -> ClientResult<AgentInfo> {
        let deadline = Instant::now() + ceiling;
        loop {
            let info = self.agent_info();
            if info.is_known() {
                return Ok(info);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::AgentInfoTimeout { waited: ceiling });
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Number of background tasks launched and not yet joined.
    pub fn running_tasks(&self) -> usize {
        match self.tasks.lock() {
            Ok(tasks) => tasks.iter().filter(|task| !task.is_finished()).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .filter(|task| !task.is_finished())
                .count(),
        }
    }

    /// Stop every task and release the connection.
    ///
    /// # Postconditions
    /// - All background tasks have exited
    /// - The transport is closed
    /// - Later [`send`](Self::send) calls return [`ClientError::Closed`]
    pub async fn close(&self) {
        info!(host = %self.shared.transport.host(), "closing protocol client");
        self.shared.stop.send_replace(true);
        self.shared.transport.close().await;

        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "client task ended abnormally");
            }
        }

        // a reconnect may have redialled while the tasks were winding down
        self.shared.transport.close().await;
        self.shared.state.send_replace(ConnectionState::Disconnected);
        debug!("protocol client closed");
    }
}

impl<T: Transport> std::fmt::Debug for ProtocolClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("host", &self.shared.transport.host())
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
