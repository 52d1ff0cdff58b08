//! Data quality monitor
//!
//! Producers call `record_*` from any task; the calls only enqueue. A single
//! aggregation task owns the counters, so they are never locked.
//!
//! # Flush cycle
//! Every `flush_interval` the aggregator:
//! 1. takes the deltas of every stream with activity in the interval
//! 2. reports them in batches of at most `batch_max` summaries
//! 3. regenerates the correlation tag for the next interval

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentlink_client::{Reporter, stopped};
use agentlink_wire::AgentInfo;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::summary::{DataMetric, Info, Location, Metrics, Stream, StreamCounters, Summary, Tag};
use crate::{MonitorError, MonitorResult};

/// Metadata key under which outbound dynamic messages carry the tag.
pub const MONITOR_TAG_KEY: &str = "tag";

/// Source of unix seconds for tags and summary timestamps.
pub type UnixClock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> UnixClock {
    Arc::new(|| Utc::now().timestamp())
}

/// Who is reporting, as stamped into every summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorIdentity {
    pub module: String,
    pub component: String,
    /// Distinguishes instances of the same component, e.g. the beat name.
    pub uniq_type: String,
    pub ip: String,
    pub cloud_id: i32,
    pub business_id: i32,
    pub down_module: String,
    pub down_component: String,
    #[serde(default)]
    pub custom_tags: BTreeMap<String, String>,
}

impl MonitorIdentity {
    /// Identity of a collector shipping to the local agent.
    pub fn new(uniq_type: impl Into<String>) -> Self {
        Self {
            module: "collector".to_owned(),
            component: "collector".to_owned(),
            uniq_type: uniq_type.into(),
            ip: String::new(),
            cloud_id: 0,
            business_id: 0,
            down_module: "collector".to_owned(),
            down_component: "agent".to_owned(),
            custom_tags: BTreeMap::new(),
        }
    }

    /// Collector identity on the host described by `agent`.
    pub fn from_agent(uniq_type: impl Into<String>, agent: &AgentInfo) -> Self {
        Self {
            ip: agent.ip.clone(),
            cloud_id: agent.cloud_id,
            business_id: agent.business_id,
            ..Self::new(uniq_type)
        }
    }

    #[must_use]
    pub fn with_custom_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_tags.insert(key.into(), value.into());
        self
    }

    pub fn complex_id(&self) -> i64 {
        agentlink_wire::complex_id(self.cloud_id, self.business_id)
    }

    /// `component|uniq_type|complex_id|ip`
    pub fn prefix_tag(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.component,
            self.uniq_type,
            self.complex_id(),
            self.ip
        )
    }

    fn info_template(&self) -> Info {
        let complex_id = self.complex_id().to_string();
        Info {
            module: self.module.clone(),
            component: self.component.clone(),
            physical_tag: Tag {
                tag: self.prefix_tag(),
                desc: BTreeMap::from([
                    ("component".to_owned(), self.component.clone()),
                    ("type".to_owned(), self.uniq_type.clone()),
                    ("complexid".to_owned(), complex_id),
                    ("ip".to_owned(), self.ip.clone()),
                ]),
            },
            logical_tag: Tag::default(),
            custom_tags: self.custom_tags.clone(),
        }
    }
}

/// Configuration for the quality monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Data id summaries are reported to; `<= 0` discards them.
    pub target_id: i32,
    pub flush_interval: Duration,
    /// Most summaries per report.
    pub batch_max: usize,
    /// Capacity of the event queue; events beyond it are dropped.
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_id: 295,
            flush_interval: Duration::from_secs(60),
            batch_max: 10,
            channel_capacity: 4096,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub const fn with_target_id(mut self, target_id: i32) -> Self {
        self.target_id = target_id;
        self
    }

    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_batch_max(mut self, batch_max: usize) -> Self {
        self.batch_max = batch_max;
        self
    }

    /// # Errors
    ///
    /// Returns [`MonitorError::Configuration`] for a zero interval, batch
    /// size or channel capacity.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.flush_interval.is_zero() {
            return Err(MonitorError::configuration("flush_interval must be non-zero"));
        }
        if self.batch_max == 0 {
            return Err(MonitorError::configuration("batch_max must be greater than 0"));
        }
        if self.channel_capacity == 0 {
            return Err(MonitorError::configuration(
                "channel_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
enum CounterEvent {
    Input { stream_id: i32, tag: String },
    Output { stream_id: i32, tag: String },
    Drop { stream_id: i32, reason: String },
}

/// Aggregation state; moved into the task on start.
struct Aggregator {
    identity: MonitorIdentity,
    template: Info,
    config: MonitorConfig,
    reporter: Arc<dyn Reporter>,
    counters: HashMap<i32, StreamCounters>,
    tag: watch::Sender<String>,
    clock: UnixClock,
}

impl Aggregator {
    fn apply(&mut self, event: CounterEvent) {
        match event {
            CounterEvent::Input { stream_id, tag } => {
                self.counters.entry(stream_id).or_default().inc_input(&tag);
            }
            CounterEvent::Output { stream_id, tag } => {
                self.counters.entry(stream_id).or_default().inc_output(&tag);
            }
            CounterEvent::Drop { stream_id, reason } => {
                self.counters.entry(stream_id).or_default().inc_drop(&reason);
            }
        }
    }

    fn refresh_tag(&self) {
        self.tag.send_replace(current_tag(&self.identity, (self.clock)()));
    }

    fn summarize(&mut self) -> Vec<Summary> {
        let time = (self.clock)();
        let mut stream_ids: Vec<i32> = self.counters.keys().copied().collect();
        stream_ids.sort_unstable();

        let mut summaries = Vec::new();
        for stream_id in stream_ids {
            let Some(loss) = self
                .counters
                .get_mut(&stream_id)
                .and_then(StreamCounters::take_delta)
            else {
                continue;
            };

            let id = stream_id.to_string();
            let logical = Tag {
                tag: id.clone(),
                desc: BTreeMap::from([("dataId".to_owned(), id)]),
            };
            summaries.push(Summary {
                time,
                info: Info {
                    logical_tag: logical.clone(),
                    ..self.template.clone()
                },
                location: Location {
                    downstream: vec![Stream {
                        module: self.identity.down_module.clone(),
                        component: self.identity.down_component.clone(),
                        logical,
                    }],
                },
                metrics: Metrics {
                    data: DataMetric { loss },
                },
            });
        }
        summaries
    }

    async fn flush(&mut self) {
        let summaries = self.summarize();
        if summaries.is_empty() {
            return;
        }

        let target_id = self.config.target_id;
        if target_id <= 0 {
            debug!(streams = summaries.len(), "quality reporting disabled, summaries discarded");
            return;
        }

        debug!(streams = summaries.len(), target_id, "sending quality summaries");
        for batch in summaries.chunks(self.config.batch_max) {
            let payload = match serde_json::to_value(batch) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "could not serialize quality summaries");
                    continue;
                }
            };
            if let Err(e) = self.reporter.report(target_id, payload).await {
                warn!(target_id, error = %e, "quality report rejected");
            }
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<CounterEvent>, mut stop: watch::Receiver<bool>) {
        info!(target_id = self.config.target_id, "quality monitor started");
        let period = self.config.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = stopped(&mut stop) => break,
                _ = ticker.tick() => {
                    self.flush().await;
                    self.refresh_tag();
                }
                event = events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
            }
        }

        info!("quality monitor stopped");
    }
}

fn current_tag(identity: &MonitorIdentity, now: i64) -> String {
    format!("{}|{}", identity.prefix_tag(), now)
}

/// Per-stream delivery counters, reported as [`Summary`] batches.
pub struct QualityMonitor {
    target_id: i32,
    events: mpsc::Sender<CounterEvent>,
    tag: watch::Receiver<String>,
    stop: watch::Sender<bool>,
    pending: Mutex<Option<(Aggregator, mpsc::Receiver<CounterEvent>)>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QualityMonitor {
    /// Create a stopped monitor.
    ///
    /// Events recorded before [`start`](Self::start) are kept, up to the
    /// channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Configuration`] if `config` is invalid.
    pub fn new(
        identity: MonitorIdentity,
        config: MonitorConfig,
        reporter: Arc<dyn Reporter>,
    ) -> MonitorResult<Self> {
        Self::with_clock(identity, config, reporter, system_clock())
    }

    /// Like [`new`](Self::new), reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Configuration`] if `config` is invalid.
    pub fn with_clock(
        identity: MonitorIdentity,
        config: MonitorConfig,
        reporter: Arc<dyn Reporter>,
        clock: UnixClock,
    ) -> MonitorResult<Self> {
        config.validate()?;

        let (events, events_rx) = mpsc::channel(config.channel_capacity);
        let (tag, tag_rx) = watch::channel(current_tag(&identity, clock()));
        let (stop, _) = watch::channel(false);
        let target_id = config.target_id;

        let aggregator = Aggregator {
            template: identity.info_template(),
            identity,
            config,
            reporter,
            counters: HashMap::new(),
            tag,
            clock,
        };

        Ok(Self {
            target_id,
            events,
            tag: tag_rx,
            stop,
            pending: Mutex::new(Some((aggregator, events_rx))),
            task: Mutex::new(None),
        })
    }

    /// Launch the aggregation task on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> MonitorResult<()> {
        let (aggregator, events) = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.take())
            .ok_or(MonitorError::AlreadyStarted)?;

        aggregator.refresh_tag();
        let handle = tokio::spawn(aggregator.run(events, self.stop.subscribe()));
        match self.task.lock() {
            Ok(mut task) => *task = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
        Ok(())
    }

    /// Count an event received from upstream.
    pub fn record_input(&self, stream_id: i32, tag: &str) {
        self.record(stream_id, || CounterEvent::Input {
            stream_id,
            tag: tag.to_owned(),
        });
    }

    /// Count an event handed to the agent; `tag` is normally [`tag`](Self::tag).
    pub fn record_output(&self, stream_id: i32, tag: &str) {
        self.record(stream_id, || CounterEvent::Output {
            stream_id,
            tag: tag.to_owned(),
        });
    }

    /// Count an event lost for `reason`.
    pub fn record_drop(&self, stream_id: i32, reason: &str) {
        self.record(stream_id, || CounterEvent::Drop {
            stream_id,
            reason: reason.to_owned(),
        });
    }

    fn record(&self, stream_id: i32, event: impl FnOnce() -> CounterEvent) {
        if stream_id <= 0 {
            return;
        }
        if let Err(e) = self.events.try_send(event()) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    warn!(?event, "monitor queue full, event not counted");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(stream_id, "monitor stopped, event not counted");
                }
            }
        }
    }

    /// Correlation tag of the current interval.
    pub fn tag(&self) -> String {
        self.tag.borrow().clone()
    }

    pub fn target_id(&self) -> i32 {
        self.target_id
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(task) => task.as_ref().is_some_and(|t| !t.is_finished()),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|t| !t.is_finished()),
        }
    }

    /// Stop aggregating. Counts not yet flushed are discarded.
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "quality monitor task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for QualityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityMonitor")
            .field("target_id", &self.target_id)
            .field("tag", &*self.tag.borrow())
            .finish_non_exhaustive()
    }
}
