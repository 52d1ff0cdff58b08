//! Agentlink monitor - delivery quality and resource reporting
//!
//! Both producers here ship their records through a
//! [`Reporter`](agentlink_client::Reporter) and never touch a connection
//! directly.
//!
//! - [`QualityMonitor`]: per-stream input/output/drop counters, flushed as
//!   [`Summary`] batches on a fixed interval
//! - [`ResourceSampler`]: CPU, memory and descriptor usage of this process

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod error;
mod quality;
mod resource;
pub mod summary;

pub use error::{MonitorError, MonitorResult};
pub use quality::{MONITOR_TAG_KEY, MonitorConfig, MonitorIdentity, QualityMonitor, UnixClock};
pub use resource::{MemorySample, ResourceSample, ResourceSampler, SamplerConfig};
pub use summary::Summary;
