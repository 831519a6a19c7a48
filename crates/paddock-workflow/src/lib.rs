//! Job workflow engine for Paddock.
//!
//! Drives training, evaluation and submission jobs from the dispatch queue
//! through the compute backend to a terminal status, then settles metrics,
//! leaderboard rankings and compute-minute usage.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod files;
pub mod helper;
pub mod logging;
pub mod performance;
pub mod phases;
pub mod queue;
pub mod services;
pub mod telemetry;
pub mod usage;

pub use config::PaddockConfig;
pub use context::{BackendJobStatus, ComputeUsage, SimulationJob, TrainingJob, VideoStream, WorkflowContext};
pub use engine::{EngineConfig, ExecutionOutcome, ExecutionStatus, RetryPolicy, WorkflowEngine, WorkflowStarter};
pub use error::{ErrorDetails, ServiceError, WorkflowError, WorkflowResult};
pub use phases::{
    DispatchOutcome, DispatcherConfig, JobDispatcher, JobFinalizer, JobInitializer, JobMonitor, Phase,
    PhaseHandler, Services,
};
pub use queue::{InMemoryJobQueue, JobMessage, JobQueue, QueueMessage};
pub use telemetry::{JobOutcomeEvent, OutcomeSink, RecordingOutcomeSink, TracingOutcomeSink};
