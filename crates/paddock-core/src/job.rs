use crate::error::{CoreError, CoreResult};
use crate::leaderboard::{EvaluationMetric, SubmissionStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Prefix shared by every job name, e.g. `paddock-training-<id>`.
pub const JOB_NAME_PREFIX: &str = "paddock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Training,
    Evaluation,
    Submission,
}

impl JobKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Evaluation => "evaluation",
            Self::Submission => "submission",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training" => Ok(Self::Training),
            "evaluation" => Ok(Self::Evaluation),
            "submission" => Ok(Self::Submission),
            other => Err(CoreError::InvalidJobName(format!("unknown job kind `{other}`"))),
        }
    }
}

/// Globally unique job name: `{prefix}-{kind}-{id}`.
///
/// The name doubles as the workflow execution name, the video stream name and
/// the compute backend job name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobName {
    kind: JobKind,
    id: String,
}

impl JobName {
    pub fn new(kind: JobKind, id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidJobName("job id is empty".to_string()));
        }
        Ok(Self { kind, id })
    }

    pub fn parse(raw: &str) -> CoreResult<Self> {
        let rest = raw
            .strip_prefix(JOB_NAME_PREFIX)
            .and_then(|r| r.strip_prefix('-'))
            .ok_or_else(|| CoreError::InvalidJobName(format!("`{raw}` lacks the `{JOB_NAME_PREFIX}-` prefix")))?;
        let (kind, id) = rest
            .split_once('-')
            .ok_or_else(|| CoreError::InvalidJobName(format!("`{raw}` has no job id")))?;
        Self::new(kind.parse()?, id)
    }

    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{JOB_NAME_PREFIX}-{}-{}", self.kind, self.id)
    }
}

impl TryFrom<String> for JobName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobName> for String {
    fn from(value: JobName) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Initializing,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Job-type-aware primary key of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    Training { model_id: String },
    Evaluation { model_id: String, evaluation_id: String },
    Submission { leaderboard_id: String, profile_id: String, submission_id: String },
}

impl JobKey {
    pub fn for_job(
        name: &JobName,
        model_id: &str,
        profile_id: &str,
        leaderboard_id: Option<&str>,
    ) -> CoreResult<Self> {
        Ok(match name.kind() {
            JobKind::Training => Self::Training { model_id: model_id.to_string() },
            JobKind::Evaluation => Self::Evaluation {
                model_id: model_id.to_string(),
                evaluation_id: name.id().to_string(),
            },
            JobKind::Submission => Self::Submission {
                leaderboard_id: leaderboard_id
                    .ok_or_else(|| {
                        CoreError::InvalidRecord(format!("submission job {name} has no leaderboard id"))
                    })?
                    .to_string(),
                profile_id: profile_id.to_string(),
                submission_id: name.id().to_string(),
            },
        })
    }

    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Training { model_id } => format!("training#{model_id}"),
            Self::Evaluation { model_id, evaluation_id } => {
                format!("evaluation#{model_id}#{evaluation_id}")
            }
            Self::Submission { leaderboard_id, profile_id, submission_id } => {
                format!("submission#{leaderboard_id}#{profile_id}#{submission_id}")
            }
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationConditions {
    pub max_time_in_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_laps: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAssetLocations {
    pub simulation_heartbeat: String,
    pub simulation_params: String,
    pub metrics: String,
    pub sim_trace: String,
    pub videos: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_logs: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackDirection {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackConfig {
    pub track_id: String,
    /// `None` for tracks that can only be driven one way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TrackDirection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceType {
    #[default]
    TimeTrial,
    ObjectAvoidance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResettingBehavior {
    pub off_track_penalty_seconds: f64,
    pub collision_penalty_seconds: f64,
    pub continuous_lap: bool,
}

/// A persisted training, evaluation or submission job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub name: JobName,
    pub model_id: String,
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaderboard_id: Option<String>,
    pub model_name: String,
    pub status: JobStatus,
    pub termination_conditions: TerminationConditions,
    pub asset_locations: JobAssetLocations,
    pub track: TrackConfig,
    #[serde(default)]
    pub race_type: RaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resetting_behavior: Option<ResettingBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_job_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<EvaluationMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SubmissionStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking_score: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_number: Option<u32>,
    #[serde(default)]
    pub usage_reconciled: bool,
    /// Internal failure detail kept for operators; never shown to users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Creates a freshly queued job.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn queued(
        name: JobName,
        model_id: impl Into<String>,
        profile_id: impl Into<String>,
        leaderboard_id: Option<String>,
        model_name: impl Into<String>,
        termination_conditions: TerminationConditions,
        asset_locations: JobAssetLocations,
        track: TrackConfig,
    ) -> Self {
        Self {
            name,
            model_id: model_id.into(),
            profile_id: profile_id.into(),
            leaderboard_id,
            model_name: model_name.into(),
            status: JobStatus::Queued,
            termination_conditions,
            asset_locations,
            track,
            race_type: RaceType::default(),
            resetting_behavior: None,
            backend_job_arn: None,
            video_stream_url: None,
            start_time: None,
            end_time: None,
            metrics: Vec::new(),
            stats: None,
            ranking_score: None,
            submission_number: None,
            usage_reconciled: false,
            error_message: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.name.kind()
    }

    pub fn key(&self) -> CoreResult<JobKey> {
        JobKey::for_job(&self.name, &self.model_id, &self.profile_id, self.leaderboard_id.as_deref())
    }
}

/// Partial update of a job record. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub backend_job_arn: Option<String>,
    /// `Some(None)` clears the stored URL.
    pub video_stream_url: Option<Option<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub training_logs_location: Option<String>,
    pub simulation_logs_location: Option<String>,
    pub metrics: Option<Vec<EvaluationMetric>>,
    pub stats: Option<SubmissionStats>,
    pub ranking_score: Option<Option<u64>>,
    pub usage_reconciled: Option<bool>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    #[must_use]
    pub fn status(status: JobStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    #[must_use]
    pub fn with_video_stream_url(mut self, url: Option<String>) -> Self {
        self.video_stream_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_backend_job_arn(mut self, arn: Option<String>) -> Self {
        self.backend_job_arn = arn;
        self
    }

    #[must_use]
    pub fn with_start_time(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = Some(at);
        self
    }

    #[must_use]
    pub fn with_end_time(mut self, at: DateTime<Utc>) -> Self {
        self.end_time = Some(at);
        self
    }

    #[must_use]
    pub fn with_error_message(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }

    /// Applies the update in place.
    ///
    /// A canceled job never leaves `CANCELED`: a status change on such a record
    /// is dropped while the remaining fields are still written.
    pub fn apply(self, record: &mut JobRecord) {
        if let Some(status) = self.status {
            if record.status == JobStatus::Canceled && status != JobStatus::Canceled {
                warn!(job_name = %record.name, requested = ?status, "Job is canceled, keeping CANCELED status");
            } else {
                record.status = status;
            }
        }
        if let Some(arn) = self.backend_job_arn {
            record.backend_job_arn = Some(arn);
        }
        if let Some(url) = self.video_stream_url {
            record.video_stream_url = url;
        }
        if let Some(at) = self.start_time {
            record.start_time = Some(at);
        }
        if let Some(at) = self.end_time {
            record.end_time = Some(at);
        }
        if let Some(location) = self.training_logs_location {
            record.asset_locations.training_logs = Some(location);
        }
        if let Some(location) = self.simulation_logs_location {
            record.asset_locations.simulation_logs = Some(location);
        }
        if let Some(metrics) = self.metrics {
            record.metrics = metrics;
        }
        if let Some(stats) = self.stats {
            record.stats = Some(stats);
        }
        if let Some(score) = self.ranking_score {
            record.ranking_score = score;
        }
        if let Some(reconciled) = self.usage_reconciled {
            record.usage_reconciled = reconciled;
        }
        if let Some(message) = self.error_message {
            record.error_message = Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: JobKind) -> JobRecord {
        let leaderboard_id = (kind == JobKind::Submission).then(|| "lb-1".to_string());
        JobRecord::queued(
            JobName::new(kind, "job-1").unwrap(),
            "model-1",
            "profile-1",
            leaderboard_id,
            "my-model",
            TerminationConditions { max_time_in_minutes: 10, max_laps: None },
            JobAssetLocations::default(),
            TrackConfig { track_id: "reinvent_base".to_string(), direction: None },
        )
    }

    #[test]
    fn test_job_name_roundtrips_through_display() {
        let name = JobName::parse("paddock-submission-abc-123").unwrap();
        assert_eq!(name.kind(), JobKind::Submission);
        assert_eq!(name.id(), "abc-123");
        assert_eq!(name.to_string(), "paddock-submission-abc-123");
    }

    #[test]
    fn test_job_name_rejects_bad_input() {
        assert!(JobName::parse("other-training-1").is_err());
        assert!(JobName::parse("paddock-inference-1").is_err());
        assert!(JobName::parse("paddock-training").is_err());
        assert!(JobName::parse("paddock-training-").is_err());
    }

    #[test]
    fn test_job_name_serializes_as_string() {
        let name = JobName::new(JobKind::Evaluation, "e1").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"paddock-evaluation-e1\"");
        let back: JobName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn test_submission_key_requires_leaderboard() {
        let name = JobName::new(JobKind::Submission, "s1").unwrap();
        assert!(JobKey::for_job(&name, "m", "p", None).is_err());
        let key = JobKey::for_job(&name, "m", "p", Some("lb")).unwrap();
        assert_eq!(key.storage_key(), "submission#lb#p#s1");
    }

    #[test]
    fn test_training_key_ignores_job_id() {
        let name = JobName::new(JobKind::Training, "t1").unwrap();
        let key = JobKey::for_job(&name, "model-9", "p", None).unwrap();
        assert_eq!(key, JobKey::Training { model_id: "model-9".to_string() });
    }

    #[test]
    fn test_update_keeps_canceled_status() {
        let mut job = record(JobKind::Evaluation);
        job.status = JobStatus::Canceled;

        JobUpdate::status(JobStatus::InProgress)
            .with_video_stream_url(Some("https://stream".to_string()))
            .apply(&mut job);

        assert_eq!(job.status, JobStatus::Canceled);
        assert_eq!(job.video_stream_url.as_deref(), Some("https://stream"));
    }

    #[test]
    fn test_update_clears_video_stream_url() {
        let mut job = record(JobKind::Training);
        job.video_stream_url = Some("https://stream".to_string());

        JobUpdate::status(JobStatus::Completed).with_video_stream_url(None).apply(&mut job);

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.video_stream_url, None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Canceled.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }
}
