//! Phase handlers that drive a job from `QUEUED` to a terminal status.
//!
//! Every handler takes the previous phase's context and returns an updated
//! one. Handlers never fail: errors are captured into
//! [`WorkflowContext::error_details`] so the engine can route to the
//! finalizer with the full diagnostic payload.

pub mod dispatcher;
pub mod finalizer;
pub mod initializer;
pub mod monitor;

pub use dispatcher::{DispatchOutcome, DispatcherConfig, JobDispatcher};
pub use finalizer::JobFinalizer;
pub use initializer::JobInitializer;
pub use monitor::JobMonitor;

use crate::context::WorkflowContext;
use crate::error::{ErrorDetails, WorkflowError};
use crate::services::{ArtifactStore, ComputeBackend, LogSource, VideoStreamService};
use crate::telemetry::OutcomeSink;
use async_trait::async_trait;
use paddock_core::{ArtifactLayout, RecordStore};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialize,
    Monitor,
    Finalize,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "JobInitializer",
            Self::Monitor => "JobMonitor",
            Self::Finalize => "JobFinalizer",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait PhaseHandler: Send + Sync {
    fn phase(&self) -> Phase;

    async fn handle(&self, ctx: WorkflowContext) -> WorkflowContext;
}

/// Collaborators shared by the phase handlers.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RecordStore>,
    pub backend: Arc<dyn ComputeBackend>,
    pub video: Arc<dyn VideoStreamService>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub logs: Arc<dyn LogSource>,
    pub outcomes: Arc<dyn OutcomeSink>,
    pub layout: ArtifactLayout,
}

/// Records a failure that routes the job to `FAILED`.
///
/// The first failure wins; later ones are kept as diagnostics.
pub(crate) fn record_failure(ctx: &mut WorkflowContext, err: &WorkflowError) {
    let details = ErrorDetails::from_error(err);
    if ctx.error_details.is_none() {
        ctx.error_details = Some(details);
    } else {
        ctx.diagnostics.push(details);
    }
}
