// Error types for the job workflow

use paddock_core::CoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for workflow operations
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Failure reported by an external collaborator (backend, stream, storage, logs, queue).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The addressed resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The service asked us to slow down
    #[error("request throttled: {0}")]
    Throttled(String),

    /// The service could not be reached or failed internally
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The request was understood but refused
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Workflow errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Record store failure
    #[error("record store error: {0}")]
    Store(#[from] CoreError),

    #[error("compute backend error: {0}")]
    Backend(#[source] ServiceError),

    #[error("video stream error: {0}")]
    VideoStream(#[source] ServiceError),

    #[error("artifact store error: {0}")]
    Artifacts(#[source] ServiceError),

    #[error("log source error: {0}")]
    Logs(#[source] ServiceError),

    #[error("job queue error: {0}")]
    Queue(#[source] ServiceError),

    /// The running simulation reported failure through its heartbeat file
    #[error("Simulation job failed: {0}")]
    SimulationFailed(String),

    /// The context lacks state a phase depends on
    #[error("missing workflow state: {0}")]
    MissingState(&'static str),

    #[error("{phase} step timed out after {after:?}")]
    StepTimedOut { phase: &'static str, after: Duration },

    /// The step task panicked or was cancelled
    #[error("{phase} step aborted: {reason}")]
    StepAborted { phase: &'static str, reason: String },

    /// The compute backend has no free training capacity
    #[error("compute backend capacity is not available, message will be retried")]
    NoCapacity,

    /// An execution with this name already ran to completion
    #[error("execution {0} already exists")]
    ExecutionAlreadyExists(String),

    #[error("invalid queue message: {0}")]
    InvalidMessage(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl WorkflowError {
    /// Short stable name of the error variant, stored as `ErrorDetails::error`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "StoreError",
            Self::Backend(_) => "BackendError",
            Self::VideoStream(_) => "VideoStreamError",
            Self::Artifacts(_) => "ArtifactStoreError",
            Self::Logs(_) => "LogSourceError",
            Self::Queue(_) => "QueueError",
            Self::SimulationFailed(_) => "SimulationFailed",
            Self::MissingState(_) => "MissingState",
            Self::StepTimedOut { .. } => "StepTimedOut",
            Self::StepAborted { .. } => "StepAborted",
            Self::NoCapacity => "NoCapacity",
            Self::ExecutionAlreadyExists(_) => "ExecutionAlreadyExists",
            Self::InvalidMessage(_) => "InvalidMessage",
            Self::Config(_) => "ConfigError",
            Self::Json(_) => "JsonError",
            Self::Yaml(_) => "YamlError",
        }
    }
}

/// Serializable failure record carried on the workflow context.
///
/// Its presence is the only failure signal the engine and the finalizer act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ErrorDetails {
    #[must_use]
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error: error.into(), message: message.into(), causes: Vec::new() }
    }

    /// Flattens an error and its source chain.
    #[must_use]
    pub fn from_error(err: &WorkflowError) -> Self {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self { error: err.kind().to_string(), message: err.to_string(), causes }
    }
}

impl From<&WorkflowError> for ErrorDetails {
    fn from(err: &WorkflowError) -> Self {
        Self::from_error(err)
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}
