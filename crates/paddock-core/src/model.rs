use crate::job::JobKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    Queued,
    Training,
    Evaluating,
    Submitting,
    Ready,
    Error,
}

impl ModelStatus {
    /// Status a model holds while a job of `kind` runs against it.
    #[must_use]
    pub const fn while_running(kind: JobKind) -> Self {
        match kind {
            JobKind::Training => Self::Training,
            JobKind::Evaluation => Self::Evaluating,
            JobKind::Submission => Self::Submitting,
        }
    }

    /// Status a model returns to once a job of `kind` ends.
    ///
    /// Only a failed training job invalidates the model.
    #[must_use]
    pub const fn after_job(kind: JobKind, failed: bool) -> Self {
        match (kind, failed) {
            (JobKind::Training, true) => Self::Error,
            _ => Self::Ready,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentAlgorithm {
    Ppo,
    Sac,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousActionSpace {
    pub low_speed: f64,
    pub high_speed: f64,
    pub low_steering_angle: f64,
    pub high_steering_angle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscreteAction {
    pub speed: f64,
    pub steering_angle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionSpace {
    Continuous(ContinuousActionSpace),
    Discrete(Vec<DiscreteAction>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub agent_algorithm: AgentAlgorithm,
    pub action_space: ActionSpace,
    pub sensors: Vec<String>,
    pub reward_function: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAssetLocations {
    pub model_root: String,
    pub model_metadata: String,
    pub reward_function: String,
    pub backend_artifacts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_artifact: Option<String>,
}

/// The trainable unit that training jobs produce and other jobs consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub model_id: String,
    pub profile_id: String,
    pub name: String,
    pub status: ModelStatus,
    pub metadata: ModelMetadata,
    pub asset_locations: ModelAssetLocations,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelUpdate {
    pub status: Option<ModelStatus>,
    pub model_artifact_location: Option<String>,
}

impl ModelUpdate {
    #[must_use]
    pub fn status(status: ModelStatus) -> Self {
        Self { status: Some(status), model_artifact_location: None }
    }

    pub fn apply(self, record: &mut ModelRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(location) = self.model_artifact_location {
            record.asset_locations.model_artifact = Some(location);
        }
    }
}
