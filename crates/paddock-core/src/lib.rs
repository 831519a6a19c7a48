//! Paddock Core
//!
//! Persisted entities and storage for the job orchestration engine:
//! - Job, model, profile, leaderboard, ranking and account usage records
//! - Job naming and job-type-aware record keys
//! - Object-storage layout for model and job artifacts
//! - The [`RecordStore`] trait with in-memory and SQLite implementations

pub mod error;
pub mod job;
pub mod layout;
pub mod leaderboard;
pub mod model;
pub mod profile;
pub mod store;

pub use error::{CoreError, CoreResult};
pub use job::{
    JobAssetLocations, JobKey, JobKind, JobName, JobRecord, JobStatus, JobUpdate, RaceType, ResettingBehavior,
    TerminationConditions, TrackConfig, TrackDirection,
};
pub use layout::{ArtifactLayout, split_location};
pub use leaderboard::{EvaluationMetric, LeaderboardRecord, RankingRecord, SubmissionStats, TimingMethod};
pub use model::{
    ActionSpace, AgentAlgorithm, ContinuousActionSpace, DiscreteAction, ModelAssetLocations, ModelMetadata,
    ModelRecord, ModelStatus, ModelUpdate,
};
pub use profile::{AccountUsageRecord, ProfileRecord, UsageCharge};
pub use store::{InMemoryRecordStore, RecordStore, SqliteRecordStore};
