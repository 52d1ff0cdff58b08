//! Event output to the co-located agent.
//!
//! [`Output`] wires the client, the quality monitor and the optional
//! resource sampler together. Events are JSON objects carrying a `dataid`;
//! each is stamped with a sequence number and the agent's identity, then
//! shipped either as a Dynamic message tagged for quality accounting or,
//! when flagged `_opdata`, as an Op message on its own connection.

use std::sync::Arc;
use std::time::Duration;

use agentlink_client::{AgentTransport, ProtocolClient, ReportError, Reporter, Transport};
use agentlink_monitor::{MONITOR_TAG_KEY, MonitorIdentity, QualityMonitor, ResourceSampler};
use agentlink_wire::{DynamicMessage, Message};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::AgentlinkConfig;
use crate::dataid::positive_data_id;
use crate::error::{OutputError, OutputResult};
use crate::sequence::{SEQUENCE_KEY, SequenceCounter, SequenceStore};

/// Marks an event as operational data.
pub const OP_DATA_FIELD: &str = "_opdata";

const AGENT_INFO_POLL: Duration = Duration::from_secs(1);

/// Stamps and ships events. Shared with the resource sampler, which reports
/// through it.
struct Publisher<T: Transport> {
    client: Arc<ProtocolClient<T>>,
    monitor: Arc<QualityMonitor>,
    sequence: SequenceCounter,
}

impl<T: Transport> Publisher<T> {
    async fn publish(&self, data_id: i32, mut event: Map<String, Value>) -> OutputResult<()> {
        let index = match event.get(SEQUENCE_KEY) {
            Some(existing) => existing_index(existing),
            None => {
                let index = self.sequence.next().await;
                event.insert(SEQUENCE_KEY.to_owned(), Value::from(index));
                index
            }
        };

        let agent = self.client.agent_info();
        if !agent.is_known() {
            return Err(OutputError::AgentInfoUnavailable);
        }
        event.insert("bizid".to_owned(), Value::from(agent.business_id));
        event.insert("cloudid".to_owned(), Value::from(agent.cloud_id));
        event.insert("ip".to_owned(), Value::from(agent.ip));

        if event.remove(OP_DATA_FIELD).is_some() {
            return self.publish_op(data_id, &event).await;
        }

        let body = serde_json::to_vec(&event).map_err(|e| OutputError::serialization(&e))?;
        let tag = self.monitor.tag();
        let mut message = DynamicMessage::new(data_id, body).with_index(index);
        message.add_meta(MONITOR_TAG_KEY, tag.as_str())?;

        self.client.send(message.into()).await?;
        self.monitor.record_output(data_id, &tag);
        Ok(())
    }

    async fn publish_op(&self, data_id: i32, event: &Map<String, Value>) -> OutputResult<()> {
        let body = serde_json::to_vec(event).map_err(|e| OutputError::serialization(&e))?;
        debug!(data_id, bytes = body.len(), "publishing operational event");
        if let Err(e) = self
            .client
            .send_with_new_connection(Message::op(data_id, body))
            .await
        {
            error!(data_id, error = %e, "operational event not delivered");
        }
        Ok(())
    }
}

/// Message index for an event that arrived already numbered; 0 when the
/// number is not an unsigned integer.
fn existing_index(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number.as_u64().unwrap_or_default(),
        Value::String(text) => text.parse().unwrap_or_default(),
        _ => 0,
    }
}

#[async_trait]
impl<T: Transport> Reporter for Publisher<T> {
    async fn report(&self, target_id: i32, payload: Value) -> Result<(), ReportError> {
        if target_id <= 0 {
            return Err(ReportError::InvalidTarget { target_id });
        }

        let mut event = Map::new();
        event.insert(OP_DATA_FIELD.to_owned(), Value::Bool(true));
        event.insert("data".to_owned(), payload);
        event.insert("dataid".to_owned(), Value::from(target_id));

        if let Err(e) = self.publish(target_id, event).await {
            warn!(target_id, error = %e, "report dropped");
        }
        Ok(())
    }
}

/// Output pipeline bound to one agent connection.
pub struct Output<T: Transport = AgentTransport> {
    publisher: Arc<Publisher<T>>,
    sampler: Option<ResourceSampler>,
}

impl Output<AgentTransport> {
    /// Start against the platform's default transport.
    ///
    /// # Errors
    ///
    /// See [`Output::start_with_transport`].
    pub async fn start(
        config: &AgentlinkConfig,
        store: Arc<dyn SequenceStore>,
    ) -> OutputResult<Self> {
        Self::start_with_transport(config, AgentTransport::default(), store).await
    }
}

impl<T: Transport> Output<T> {
    /// Connect, wait for the agent's identity, then start the quality
    /// monitor and, if `resource_id > 0`, the resource sampler.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Config`] for an invalid config,
    /// [`OutputError::Client`] if the agent is unreachable or never reports
    /// its identity, and [`OutputError::Monitor`] if the monitor cannot
    /// start. Nothing is left running on error.
    pub async fn start_with_transport(
        config: &AgentlinkConfig,
        transport: T,
        store: Arc<dyn SequenceStore>,
    ) -> OutputResult<Self> {
        config.validate()?;

        let client = Arc::new(ProtocolClient::new(config.client.clone(), transport)?);
        client.start().await?;

        let agent = match client
            .wait_for_agent_info(AGENT_INFO_POLL, config.agent_info_timeout())
            .await
        {
            Ok(agent) => agent,
            Err(e) => {
                client.close().await;
                return Err(e.into());
            }
        };
        info!(%agent, "agent identity received");

        let identity = MonitorIdentity::from_agent(config.name.as_str(), &agent);
        let raw: Arc<dyn Reporter> = client.clone();
        let monitor = match QualityMonitor::new(identity, config.monitor_config(), raw)
            .and_then(|monitor| monitor.start().map(|()| monitor))
        {
            Ok(monitor) => Arc::new(monitor),
            Err(e) => {
                client.close().await;
                return Err(e.into());
            }
        };
        info!(target_id = monitor.target_id(), tag = %monitor.tag(), "quality monitor started");

        let publisher = Arc::new(Publisher {
            client,
            monitor,
            sequence: SequenceCounter::new(store, SEQUENCE_KEY),
        });

        let sampler_config = config.sampler_config();
        let sampler = if sampler_config.is_enabled() {
            let sampler = ResourceSampler::new(sampler_config, publisher.clone());
            if let Err(e) = sampler.start() {
                publisher.monitor.stop().await;
                publisher.client.close().await;
                return Err(e.into());
            }
            Some(sampler)
        } else {
            None
        };

        Ok(Self { publisher, sampler })
    }

    /// Publish one event.
    ///
    /// The event must be a JSON object with a positive `dataid`, given as
    /// an integer or a decimal string. An event without `gseindex` gets the
    /// next sequence number; an existing one is kept and reused as the
    /// message index. `bizid`, `cloudid` and `ip` are overwritten. Events
    /// with `_opdata` set are sent as Op
    /// messages on a dedicated connection; their delivery failures are
    /// logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::NotAnObject`], [`OutputError::MissingDataId`]
    /// or [`OutputError::InvalidDataId`] for malformed events,
    /// [`OutputError::AgentInfoUnavailable`] if the agent identity was
    /// lost, and [`OutputError::Client`] after [`close`](Self::close).
    pub async fn publish_event(&self, event: Value) -> OutputResult<()> {
        let Value::Object(event) = event else {
            return Err(OutputError::NotAnObject);
        };
        let data_id = event
            .get("dataid")
            .ok_or(OutputError::MissingDataId)
            .and_then(|raw| positive_data_id(raw).map_err(OutputError::from))?;

        self.publisher.publish(data_id, event).await
    }

    pub fn monitor(&self) -> &QualityMonitor {
        &self.publisher.monitor
    }

    pub fn client(&self) -> &ProtocolClient<T> {
        &self.publisher.client
    }

    /// Stop the sampler and the monitor, then close the client. Unflushed
    /// quality counts are discarded.
    pub async fn close(&self) {
        if let Some(sampler) = &self.sampler {
            sampler.stop().await;
        }
        self.publisher.monitor.stop().await;
        self.publisher.client.close().await;
        info!("output closed");
    }
}

/// Reports go out as `_opdata` events wrapping the payload under `data`.
#[async_trait]
impl<T: Transport> Reporter for Output<T> {
    async fn report(&self, target_id: i32, payload: Value) -> Result<(), ReportError> {
        self.publisher.report(target_id, payload).await
    }
}

impl<T: Transport> std::fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("client", &self.publisher.client)
            .field("monitor", &self.publisher.monitor)
            .field("sampler", &self.sampler.is_some())
            .finish_non_exhaustive()
    }
}
