//! Scripted in-memory transport shared by the client integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentlink_client::{ConnError, ConnResult, Transport};
use agentlink_wire::{Header, IncomingCommand, MessageKind};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Observable transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Dial { conn: usize, ok: bool },
    Write { conn: usize, msg_type: u32, ok: bool },
    Close { conn: usize },
}

impl Event {
    pub fn conn(&self) -> usize {
        match self {
            Self::Dial { conn, .. } | Self::Write { conn, .. } | Self::Close { conn } => *conn,
        }
    }
}

enum Incoming {
    Bytes(Vec<u8>),
    Eof,
}

struct Feed {
    rx: mpsc::UnboundedReceiver<Incoming>,
    pending: VecDeque<u8>,
}

/// State shared by a transport and every `fresh()` copy of it.
struct Script {
    events: Mutex<Vec<Event>>,
    dial_times: Mutex<Vec<Instant>>,
    written: Mutex<Vec<Vec<u8>>>,
    failing_dials: AtomicU32,
    dials_always_fail: AtomicBool,
    failing_writes: Mutex<Option<(u32, u32)>>,
    feed_tx: mpsc::UnboundedSender<Incoming>,
    feed: tokio::sync::Mutex<Feed>,
    next_conn: AtomicUsize,
}

struct Conn {
    id: usize,
    connected: AtomicBool,
    closed: watch::Sender<u64>,
}

impl Conn {
    fn new(id: usize) -> Self {
        let (closed, _) = watch::channel(0);
        Self {
            id,
            connected: AtomicBool::new(false),
            closed,
        }
    }
}

#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Script>,
    conn: Arc<Conn>,
    host: String,
}

impl MockTransport {
    pub fn new() -> Self {
        let (feed_tx, rx) = mpsc::unbounded_channel();
        Self {
            script: Arc::new(Script {
                events: Mutex::new(Vec::new()),
                dial_times: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
                failing_dials: AtomicU32::new(0),
                dials_always_fail: AtomicBool::new(false),
                failing_writes: Mutex::new(None),
                feed_tx,
                feed: tokio::sync::Mutex::new(Feed {
                    rx,
                    pending: VecDeque::new(),
                }),
                next_conn: AtomicUsize::new(1),
            }),
            conn: Arc::new(Conn::new(0)),
            host: "mock-agent".to_string(),
        }
    }

    /// Id of this handle's connection; `fresh()` copies get other ids.
    pub fn conn_id(&self) -> usize {
        self.conn.id
    }

    pub fn fail_dials(&self, count: u32) {
        self.script.failing_dials.store(count, Ordering::SeqCst);
    }

    pub fn fail_dials_forever(&self) {
        self.script.dials_always_fail.store(true, Ordering::SeqCst);
    }

    pub fn heal_dials(&self) {
        self.script.dials_always_fail.store(false, Ordering::SeqCst);
        self.script.failing_dials.store(0, Ordering::SeqCst);
    }

    /// Fail the next `count` writes of frames of `kind`.
    pub fn fail_writes(&self, kind: MessageKind, count: u32) {
        *self.script.failing_writes.lock().unwrap() = Some((kind.code(), count));
    }

    /// Queue an agent frame for the receiver.
    pub fn push_frame(&self, msg_type: u32, body: &[u8]) {
        let command = IncomingCommand {
            msg_type,
            body_length: body.len() as u32,
        };
        let mut bytes = command.encode().to_vec();
        bytes.extend_from_slice(body);
        self.script.feed_tx.send(Incoming::Bytes(bytes)).unwrap();
    }

    pub fn push_agent_info(&self, json: &str) {
        self.push_frame(MessageKind::RequestConfig.code(), json.as_bytes());
    }

    /// Make the next read report that the agent hung up.
    pub fn push_eof(&self) {
        self.script.feed_tx.send(Incoming::Eof).unwrap();
    }

    pub fn events(&self) -> Vec<Event> {
        self.script.events.lock().unwrap().clone()
    }

    pub fn dial_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Dial { .. }))
            .count()
    }

    pub fn dial_times(&self) -> Vec<Instant> {
        self.script.dial_times.lock().unwrap().clone()
    }

    /// Successfully written frames of `kind`, in write order.
    pub fn written(&self, kind: MessageKind) -> Vec<Vec<u8>> {
        self.script
            .written
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| Header::decode(frame).unwrap().msg_type == kind.code())
            .cloned()
            .collect()
    }

    fn record(&self, event: Event) {
        self.script.events.lock().unwrap().push(event);
    }

    fn next_write_fails(&self, msg_type: u32) -> bool {
        let mut plan = self.script.failing_writes.lock().unwrap();
        match plan.as_mut() {
            Some((kind, remaining)) if *kind == msg_type && *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn next_dial_fails(&self) -> bool {
        if self.script.dials_always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.script
            .failing_dials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dial(&self) -> ConnResult<()> {
        self.script.dial_times.lock().unwrap().push(Instant::now());
        let ok = !self.next_dial_fails();
        self.record(Event::Dial {
            conn: self.conn.id,
            ok,
        });

        if ok {
            self.conn.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            let err = std::io::Error::new(ErrorKind::ConnectionRefused, "scripted refusal");
            Err(ConnError::dial(self.host.clone(), &err))
        }
    }

    async fn write(&self, bytes: &[u8], _timeout: Duration) -> ConnResult<usize> {
        let msg_type = Header::decode(bytes).map(|h| h.msg_type).unwrap_or(0);

        if !self.conn.connected.load(Ordering::SeqCst) {
            self.record(Event::Write {
                conn: self.conn.id,
                msg_type,
                ok: false,
            });
            return Err(ConnError::NotConnected);
        }

        let fails = self.next_write_fails(msg_type);
        self.record(Event::Write {
            conn: self.conn.id,
            msg_type,
            ok: !fails,
        });

        if fails {
            let err = std::io::Error::new(ErrorKind::BrokenPipe, "scripted failure");
            return Err(ConnError::write(&err));
        }
        self.script.written.lock().unwrap().push(bytes.to_vec());
        Ok(bytes.len())
    }

    async fn read(&self, buf: &mut [u8]) -> ConnResult<usize> {
        let mut closed = self.conn.closed.subscribe();
        if !self.conn.connected.load(Ordering::SeqCst) {
            return Err(ConnError::NotConnected);
        }

        let mut feed = self.script.feed.lock().await;
        loop {
            if !feed.pending.is_empty() {
                let n = buf.len().min(feed.pending.len());
                for (slot, byte) in buf.iter_mut().zip(feed.pending.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }

            let incoming = tokio::select! {
                incoming = feed.rx.recv() => incoming,
                _ = closed.changed() => return Err(ConnError::Closed),
            };
            match incoming {
                Some(Incoming::Bytes(bytes)) => feed.pending.extend(bytes),
                Some(Incoming::Eof) => return Ok(0),
                None => return Err(ConnError::Eof),
            }
        }
    }

    async fn close(&self) {
        self.conn.connected.store(false, Ordering::SeqCst);
        self.conn
            .closed
            .send_modify(|generation| *generation = generation.wrapping_add(1));
        self.record(Event::Close { conn: self.conn.id });
    }

    fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn fresh(&self) -> Self {
        let id = self.script.next_conn.fetch_add(1, Ordering::SeqCst);
        Self {
            script: Arc::clone(&self.script),
            conn: Arc::new(Conn::new(id)),
            host: self.host.clone(),
        }
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// `data_id` of an encoded outbound frame.
pub fn data_id(frame: &[u8]) -> i32 {
    Header::decode(frame).unwrap().data_id
}
