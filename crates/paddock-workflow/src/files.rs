//! Job configuration files written before backend submission, and the
//! heartbeat file the running simulation writes back.

use crate::error::WorkflowResult;
use paddock_core::{
    ActionSpace, AgentAlgorithm, JobKind, JobRecord, ModelRecord, ProfileRecord, RaceType, TrackDirection,
    split_location,
};
use serde::{Deserialize, Serialize};

pub const NEURAL_NETWORK: &str = "DEEP_CONVOLUTIONAL_NETWORK_SHALLOW";
pub const SIM_APP_VERSION: u32 = 6;
/// Resets the simulation allows per evaluation trial.
pub const EVALUATION_RESET_LIMIT: u32 = 10_000;

/// Environment handed to the simulation, serialized as YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SimulationParams {
    pub job_type: String,
    pub world_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_direction_clockwise: Option<bool>,
    pub race_type: RaceType,
    pub kinesis_video_stream_name: String,
    pub video_job_type: String,
    pub model_name: String,
    pub racer_name: String,
    pub metrics_s3_bucket: String,
    pub metrics_s3_object_key: String,
    pub simtrace_s3_bucket: String,
    pub simtrace_s3_prefix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mp4_s3_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mp4_s3_object_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_s3_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_s3_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_trials: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_resets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_track_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_continuous: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_driving_direction: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_start_position: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_metadata_file_s3_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_file_s3_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sagemaker_shared_s3_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sagemaker_shared_s3_prefix: Option<String>,
}

fn owned(pair: (&str, &str)) -> (String, String) {
    (pair.0.to_string(), pair.1.to_string())
}

impl SimulationParams {
    pub fn for_job(job: &JobRecord, model: &ModelRecord, profile: &ProfileRecord) -> WorkflowResult<Self> {
        let kind = job.kind();
        let job_type = kind.as_str().to_uppercase();
        let (metrics_bucket, metrics_key) = owned(split_location(&job.asset_locations.metrics)?);
        let (simtrace_bucket, simtrace_prefix) = owned(split_location(&job.asset_locations.sim_trace)?);

        let mut params = Self {
            video_job_type: if kind == JobKind::Submission { "RACING".to_string() } else { job_type.clone() },
            job_type,
            world_name: job.track.track_id.clone(),
            track_direction_clockwise: job.track.direction.map(|d| d == TrackDirection::Clockwise),
            race_type: job.race_type,
            kinesis_video_stream_name: job.name.to_string(),
            model_name: model.name.clone(),
            racer_name: profile.alias.clone(),
            metrics_s3_bucket: metrics_bucket,
            metrics_s3_object_key: metrics_key,
            simtrace_s3_bucket: simtrace_bucket,
            simtrace_s3_prefix: simtrace_prefix,
            ..Self::default()
        };

        let (artifacts_bucket, artifacts_prefix) = owned(split_location(&model.asset_locations.backend_artifacts)?);
        match kind {
            JobKind::Training => {
                let (_, metadata_key) = split_location(&model.asset_locations.model_metadata)?;
                let (_, reward_key) = split_location(&model.asset_locations.reward_function)?;
                params.alternate_driving_direction = Some(false);
                params.change_start_position = Some(true);
                params.metric_name = Some("TrainingRewardScore".to_string());
                params.metric_namespace = Some("Paddock".to_string());
                params.model_metadata_file_s3_key = Some(metadata_key.to_string());
                params.reward_file_s3_key = Some(reward_key.to_string());
                params.sagemaker_shared_s3_bucket = Some(artifacts_bucket);
                params.sagemaker_shared_s3_prefix = Some(artifacts_prefix);
            }
            JobKind::Evaluation | JobKind::Submission => {
                let (videos_bucket, videos_prefix) = owned(split_location(&job.asset_locations.videos)?);
                params.mp4_s3_bucket = Some(videos_bucket);
                params.mp4_s3_object_prefix = Some(videos_prefix);
                params.model_s3_bucket = Some(artifacts_bucket);
                params.model_s3_prefix = Some(artifacts_prefix);
                params.number_of_trials = job.termination_conditions.max_laps;
                if let Some(resetting) = &job.resetting_behavior {
                    params.number_of_resets = Some(EVALUATION_RESET_LIMIT);
                    params.off_track_penalty = Some(resetting.off_track_penalty_seconds);
                    params.collision_penalty = Some(resetting.collision_penalty_seconds);
                    params.is_continuous = Some(resetting.continuous_lap);
                }
            }
        }
        Ok(params)
    }

    pub fn to_yaml(&self) -> WorkflowResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedRange {
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSpaceFile {
    Continuous { speed: SpeedRange, steering_angle: SpeedRange },
    Discrete(Vec<DiscreteActionFile>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteActionFile {
    pub speed: f64,
    pub steering_angle: f64,
}

/// `model_metadata.json` read by the training container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadataFile {
    pub action_space: ActionSpaceFile,
    pub action_space_type: String,
    pub neural_network: String,
    pub sensor: Vec<String>,
    pub training_algorithm: String,
    pub version: u32,
}

impl ModelMetadataFile {
    #[must_use]
    pub fn for_model(model: &ModelRecord) -> Self {
        let metadata = &model.metadata;
        let (action_space, action_space_type) = match &metadata.action_space {
            ActionSpace::Continuous(space) => (
                ActionSpaceFile::Continuous {
                    speed: SpeedRange { high: space.high_speed, low: space.low_speed },
                    steering_angle: SpeedRange { high: space.high_steering_angle, low: space.low_steering_angle },
                },
                "continuous",
            ),
            ActionSpace::Discrete(actions) => (
                ActionSpaceFile::Discrete(
                    actions
                        .iter()
                        .map(|a| DiscreteActionFile { speed: a.speed, steering_angle: a.steering_angle })
                        .collect(),
                ),
                "discrete",
            ),
        };
        Self {
            action_space,
            action_space_type: action_space_type.to_string(),
            neural_network: NEURAL_NETWORK.to_string(),
            sensor: metadata.sensors.clone(),
            training_algorithm: match metadata.agent_algorithm {
                AgentAlgorithm::Ppo => "clipped_ppo",
                AgentAlgorithm::Sac => "sac",
            }
            .to_string(),
            version: SIM_APP_VERSION,
        }
    }

    pub fn to_json(&self) -> WorkflowResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationJobStatus {
    Initializing,
    Running,
    Failed,
    Closed,
    #[serde(other)]
    Unknown,
}

/// Heartbeat file the running simulation keeps up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationHeartbeat {
    pub job_status: SimulationJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
