//! The payload threaded through every phase of a job workflow.
//!
//! Each phase receives the context returned by the previous one and hands back
//! an updated copy. The engine persists nothing itself; the context is the
//! only state carried between phases.

use crate::error::ErrorDetails;
use chrono::{DateTime, Utc};
use paddock_core::{CoreResult, JobKey, JobKind, JobName};
use serde::{Deserialize, Serialize};

/// Status of a job on the compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendJobStatus {
    InProgress,
    Completed,
    Failed,
    Stopping,
    Stopped,
}

impl BackendJobStatus {
    /// Whether the monitor loop keeps polling a job in this state.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::InProgress | Self::Stopping)
    }

    /// Statuses after which a training job has produced a usable model.
    #[must_use]
    pub const fn produced_artifact(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationJob {
    #[serde(rename = "heartbeatS3Location")]
    pub heartbeat_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJob {
    pub name: String,
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BackendJobStatus>,
    #[serde(default, rename = "modelArtifactS3Location", skip_serializing_if = "Option::is_none")]
    pub model_artifact_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStream {
    pub arn: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_expiration: Option<DateTime<Utc>>,
}

impl VideoStream {
    /// Whether the cached viewing URL must be fetched again at `now`.
    #[must_use]
    pub fn needs_url_refresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.url, self.url_expiration) {
            (Some(_), Some(expires)) => now > expires,
            _ => true,
        }
    }
}

/// Compute minutes for one job, set by the finalizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeUsage {
    pub minutes_queued: f64,
    pub minutes_used: f64,
}

impl ComputeUsage {
    /// Minutes billed to the user: never more than they reserved.
    #[must_use]
    pub fn billed_minutes(&self) -> f64 {
        self.minutes_queued.min(self.minutes_used)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    pub job_name: JobName,
    pub job_kind: JobKind,
    pub model_id: String,
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaderboard_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_job: Option<SimulationJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_job: Option<TrainingJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_stream: Option<VideoStream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_usage: Option<ComputeUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    /// Failures of side effects that must not route the job to failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<ErrorDetails>,
}

impl WorkflowContext {
    #[must_use]
    pub fn new(
        job_name: JobName,
        model_id: impl Into<String>,
        profile_id: impl Into<String>,
        leaderboard_id: Option<String>,
    ) -> Self {
        Self {
            job_kind: job_name.kind(),
            job_name,
            model_id: model_id.into(),
            profile_id: profile_id.into(),
            leaderboard_id,
            simulation_job: None,
            training_job: None,
            video_stream: None,
            compute_usage: None,
            error_details: None,
            diagnostics: Vec::new(),
        }
    }

    /// Key of the job record this execution drives.
    pub fn job_key(&self) -> CoreResult<JobKey> {
        JobKey::for_job(&self.job_name, &self.model_id, &self.profile_id, self.leaderboard_id.as_deref())
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.error_details.is_some()
    }

    #[must_use]
    pub fn backend_status(&self) -> Option<BackendJobStatus> {
        self.training_job.as_ref().and_then(|job| job.status)
    }
}
