//! Job outcome events emitted once per finalized job.

use chrono::{DateTime, Utc};
use paddock_core::{JobKind, JobStatus};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcomeEvent {
    pub job_name: String,
    pub job_kind: JobKind,
    pub job_status: JobStatus,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaderboard_id: Option<String>,
    pub billed_minutes: f64,
    pub emitted_at: DateTime<Utc>,
}

pub trait OutcomeSink: Send + Sync {
    fn on_outcome(&self, event: JobOutcomeEvent);
}

/// Writes outcome events to the log as structured `info` records.
#[derive(Debug, Default)]
pub struct TracingOutcomeSink;

impl OutcomeSink for TracingOutcomeSink {
    fn on_outcome(&self, event: JobOutcomeEvent) {
        info!(
            target: "paddock::job_outcome",
            job_name = %event.job_name,
            job_kind = %event.job_kind,
            job_status = ?event.job_status,
            model_id = %event.model_id,
            leaderboard_id = event.leaderboard_id.as_deref().unwrap_or(""),
            billed_minutes = event.billed_minutes,
            "JobOutcome"
        );
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingOutcomeSink {
    events: Mutex<Vec<JobOutcomeEvent>>,
}

impl RecordingOutcomeSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<JobOutcomeEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl OutcomeSink for RecordingOutcomeSink {
    fn on_outcome(&self, event: JobOutcomeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
