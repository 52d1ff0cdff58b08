//! Quality summary records.
//!
//! Field names follow the downstream collector's schema, so the serde
//! renames here are part of the wire contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of one stream's counters for one flush interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Unix seconds at flush time
    pub time: i64,
    pub info: Info,
    pub location: Location,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub module: String,
    pub component: String,
    /// `component|uniq_type|complex_id|ip`
    pub physical_tag: Tag,
    /// The stream id
    pub logical_tag: Tag,
    #[serde(default)]
    pub custom_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag: String,
    #[serde(default)]
    pub desc: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub downstream: Vec<Stream>,
}

/// One hop downstream of this process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub module: String,
    pub component: String,
    #[serde(rename = "logical_tag")]
    pub logical: Tag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(rename = "data_monitor")]
    pub data: DataMetric,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMetric {
    #[serde(rename = "data_loss")]
    pub loss: DataLoss,
}

/// Counters reported for a stream. Absent counters had no increment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLoss {
    pub input: Option<Count>,
    pub output: Option<Count>,
    #[serde(rename = "data_drop", default)]
    pub drop: BTreeMap<String, DropCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    /// Per-tag counts since the last flush
    pub tags: BTreeMap<String, u64>,
    #[serde(rename = "total_cnt")]
    pub sum: u64,
    #[serde(rename = "total_cnt_increment")]
    pub increment: u64,
}

impl Count {
    pub fn inc(&mut self, tag: &str) {
        self.sum += 1;
        self.increment += 1;
        *self.tags.entry(tag.to_owned()).or_default() += 1;
    }

    /// Zero the interval fields, keeping the running sum.
    pub fn reset(&mut self) {
        self.tags.clear();
        self.increment = 0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCount {
    #[serde(rename = "cnt")]
    pub count: u64,
    pub reason: String,
}

/// Live counters for one stream, owned by the aggregation task.
#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    input: Count,
    output: Count,
    drops: BTreeMap<String, DropCount>,
}

impl StreamCounters {
    pub(crate) fn inc_input(&mut self, tag: &str) {
        self.input.inc(tag);
    }

    pub(crate) fn inc_output(&mut self, tag: &str) {
        self.output.inc(tag);
    }

    pub(crate) fn inc_drop(&mut self, reason: &str) {
        self.drops
            .entry(reason.to_owned())
            .or_insert_with(|| DropCount {
                count: 0,
                reason: reason.to_owned(),
            })
            .count += 1;
    }

    /// Take this interval's deltas and reset, or `None` if nothing happened.
    pub(crate) fn take_delta(&mut self) -> Option<DataLoss> {
        if self.input.increment == 0 && self.output.increment == 0 && self.drops.is_empty() {
            return None;
        }

        let delta = DataLoss {
            input: (self.input.increment > 0).then(|| self.input.clone()),
            output: (self.output.increment > 0).then(|| self.output.clone()),
            drop: std::mem::take(&mut self.drops),
        };
        self.input.reset();
        self.output.reset();
        Some(delta)
    }
}
