//! Compute backend that runs training and simulation workloads.

use crate::context::BackendJobStatus;
use crate::error::ServiceError;
use async_trait::async_trait;
use paddock_core::{JobKind, JobRecord, ModelRecord};
use serde::{Deserialize, Serialize};

/// Everything the backend needs to launch one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJobRequest {
    pub job_name: String,
    pub job_kind: JobKind,
    /// Hard wall-clock limit enforced by the backend.
    pub max_runtime_seconds: u64,
    pub simulation_params_location: String,
    /// Where the backend reads and writes model checkpoints.
    pub backend_artifacts_location: String,
    /// Existing model to evaluate or submit; `None` for training.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_artifact_location: Option<String>,
}

impl TrainingJobRequest {
    #[must_use]
    pub fn for_job(job: &JobRecord, model: &ModelRecord) -> Self {
        let kind = job.kind();
        Self {
            job_name: job.name.to_string(),
            job_kind: kind,
            max_runtime_seconds: u64::from(job.termination_conditions.max_time_in_minutes) * 60,
            simulation_params_location: job.asset_locations.simulation_params.clone(),
            backend_artifacts_location: model.asset_locations.backend_artifacts.clone(),
            model_artifact_location: match kind {
                JobKind::Training => None,
                JobKind::Evaluation | JobKind::Submission => model.asset_locations.model_artifact.clone(),
            },
        }
    }
}

/// Final or current details of a backend job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendJobDescription {
    pub status: BackendJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_artifact_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_time_seconds: Option<u64>,
}

#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Submits a job and returns its ARN.
    async fn submit_job(&self, request: &TrainingJobRequest) -> Result<String, ServiceError>;

    async fn describe_job(&self, job_name: &str) -> Result<BackendJobDescription, ServiceError>;

    async fn stop_job(&self, job_name: &str) -> Result<(), ServiceError>;

    /// Whether another training instance can be started right now.
    async fn has_capacity(&self) -> Result<bool, ServiceError>;
}
