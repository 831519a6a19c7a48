use crate::error::ServiceError;
use async_trait::async_trait;
use paddock_core::JobKind;

pub const TRAINING_TRAINING_LOG_GROUP: &str = "/paddock/training/TrainingJobs";
pub const TRAINING_SIMULATION_LOG_GROUP: &str = "/paddock/training/SimulationJobs";
pub const EVALUATION_SIMULATION_LOG_GROUP: &str = "/paddock/evaluation/SimulationJobs";

/// Which log stream of a job is being shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Training,
    Simulation,
}

impl LogType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Simulation => "simulation",
        }
    }

    /// Streams shipped for a job: training jobs ship both, others only simulation.
    #[must_use]
    pub fn for_job(kind: JobKind) -> &'static [LogType] {
        match kind {
            JobKind::Training => &[Self::Training, Self::Simulation],
            JobKind::Evaluation | JobKind::Submission => &[Self::Simulation],
        }
    }

    #[must_use]
    pub const fn log_group(self, kind: JobKind) -> &'static str {
        match (self, kind) {
            (Self::Training, _) => TRAINING_TRAINING_LOG_GROUP,
            (Self::Simulation, JobKind::Training) => TRAINING_SIMULATION_LOG_GROUP,
            (Self::Simulation, JobKind::Evaluation | JobKind::Submission) => EVALUATION_SIMULATION_LOG_GROUP,
        }
    }
}

/// Source of job log streams, keyed by log group and stream (job) name.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn read_stream(&self, log_group: &str, stream_name: &str) -> Result<String, ServiceError>;
}
