//! Reporter double that keeps every report in memory.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::sync::Mutex;

use agentlink_client::{ReportError, Reporter};
use agentlink_monitor::Summary;
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(i32, serde_json::Value)>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<(i32, serde_json::Value)> {
        self.reports.lock().unwrap().clone()
    }

    /// Every report decoded as a summary batch.
    pub fn batches(&self) -> Vec<Vec<Summary>> {
        self.reports()
            .into_iter()
            .map(|(_, payload)| serde_json::from_value(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(&self, target_id: i32, payload: serde_json::Value) -> Result<(), ReportError> {
        if target_id <= 0 {
            return Err(ReportError::InvalidTarget { target_id });
        }
        self.reports.lock().unwrap().push((target_id, payload));
        Ok(())
    }
}
