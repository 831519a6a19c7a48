use crate::error::{CoreError, CoreResult};
use crate::job::{JobAssetLocations, JobName};
use crate::model::ModelAssetLocations;
use chrono::{DateTime, SecondsFormat, Utc};

/// URI scheme used for every artifact location.
pub const LOCATION_SCHEME: &str = "s3://";

/// Object-storage layout for model and job artifacts.
///
/// Everything for a model lives under
/// `s3://{bucket}/{profile_id}/models/{model_id}/`.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    bucket: String,
}

impl ArtifactLayout {
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into() }
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[must_use]
    pub fn model_root(&self, profile_id: &str, model_id: &str) -> String {
        format!("{LOCATION_SCHEME}{}/{profile_id}/models/{model_id}/", self.bucket)
    }

    #[must_use]
    pub fn model_metadata(&self, profile_id: &str, model_id: &str) -> String {
        format!("{}model_metadata.json", self.model_root(profile_id, model_id))
    }

    #[must_use]
    pub fn reward_function(&self, profile_id: &str, model_id: &str) -> String {
        format!("{}reward_function.py", self.model_root(profile_id, model_id))
    }

    #[must_use]
    pub fn backend_artifacts(&self, profile_id: &str, model_id: &str) -> String {
        format!("{}sagemaker-artifacts/", self.model_root(profile_id, model_id))
    }

    #[must_use]
    pub fn simulation_params(&self, profile_id: &str, model_id: &str) -> String {
        format!("{}training_params.yaml", self.backend_artifacts(profile_id, model_id))
    }

    /// Heartbeat file written by the running simulation, one per job kind.
    #[must_use]
    pub fn simulation_heartbeat(&self, profile_id: &str, model_id: &str, job: &JobName) -> String {
        format!("{}{}_job_status.json", self.backend_artifacts(profile_id, model_id), job.kind())
    }

    #[must_use]
    pub fn metrics(&self, profile_id: &str, model_id: &str, job: &JobName, at: DateTime<Utc>) -> String {
        format!(
            "{}metrics/{}/{}-{job}.json",
            self.model_root(profile_id, model_id),
            job.kind(),
            timestamp(at)
        )
    }

    #[must_use]
    pub fn sim_trace(&self, profile_id: &str, model_id: &str, job: &JobName, at: DateTime<Utc>) -> String {
        format!(
            "{}sim-trace/{}/{}-{job}/",
            self.model_root(profile_id, model_id),
            job.kind(),
            timestamp(at)
        )
    }

    #[must_use]
    pub fn videos(&self, profile_id: &str, model_id: &str, job: &JobName, at: DateTime<Utc>) -> String {
        format!(
            "{}videos/{}/{}-{job}/",
            self.model_root(profile_id, model_id),
            job.kind(),
            timestamp(at)
        )
    }

    #[must_use]
    pub fn logs(
        &self,
        profile_id: &str,
        model_id: &str,
        job: &JobName,
        log_type: &str,
        at: DateTime<Utc>,
    ) -> String {
        format!(
            "{}logs/{}/{}-{job}-{log_type}.log",
            self.model_root(profile_id, model_id),
            job.kind(),
            timestamp(at)
        )
    }

    /// Asset locations for a new job, all stamped with the same creation time.
    #[must_use]
    pub fn job_assets(&self, profile_id: &str, model_id: &str, job: &JobName, at: DateTime<Utc>) -> JobAssetLocations {
        let videos = self.videos(profile_id, model_id, job, at);
        JobAssetLocations {
            simulation_heartbeat: self.simulation_heartbeat(profile_id, model_id, job),
            simulation_params: self.simulation_params(profile_id, model_id),
            metrics: self.metrics(profile_id, model_id, job, at),
            sim_trace: self.sim_trace(profile_id, model_id, job, at),
            primary_video: Some(format!("{videos}camera-pip/0-video.mp4")),
            videos,
            training_logs: None,
            simulation_logs: None,
        }
    }

    #[must_use]
    pub fn model_assets(&self, profile_id: &str, model_id: &str) -> ModelAssetLocations {
        ModelAssetLocations {
            model_root: self.model_root(profile_id, model_id),
            model_metadata: self.model_metadata(profile_id, model_id),
            reward_function: self.reward_function(profile_id, model_id),
            backend_artifacts: self.backend_artifacts(profile_id, model_id),
            model_artifact: None,
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Splits `s3://bucket/key` into `(bucket, key)`.
pub fn split_location(location: &str) -> CoreResult<(&str, &str)> {
    location
        .strip_prefix(LOCATION_SCHEME)
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, _)| !bucket.is_empty())
        .ok_or_else(|| CoreError::InvalidRecord(format!("`{location}` is not an artifact location")))
}
