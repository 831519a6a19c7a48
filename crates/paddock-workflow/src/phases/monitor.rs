use super::{Phase, PhaseHandler, Services, record_failure};
use crate::context::{BackendJobStatus, WorkflowContext};
use crate::error::{ErrorDetails, WorkflowError, WorkflowResult};
use crate::files::{SimulationHeartbeat, SimulationJobStatus};
use crate::helper::WorkflowHelper;
use crate::services::VIEWING_URL_EXPIRY;
use async_trait::async_trait;
use chrono::Utc;
use paddock_core::{JobStatus, JobUpdate};
use tracing::{debug, error, info, warn};

/// Polling step, re-invoked by the engine while the backend job is active.
///
/// Checks run in order and the first failing check ends the invocation:
/// simulation heartbeat, backend status, then the video viewing URL.
pub struct JobMonitor {
    services: Services,
    helper: WorkflowHelper,
}

impl JobMonitor {
    #[must_use]
    pub fn new(services: Services) -> Self {
        let helper = WorkflowHelper::new(services.store.clone());
        Self { services, helper }
    }

    async fn monitor(&self, ctx: &mut WorkflowContext) -> WorkflowResult<()> {
        self.check_simulation_status(ctx).await?;
        self.check_backend_status(ctx).await?;
        self.check_video_stream_url(ctx).await;
        Ok(())
    }

    async fn check_simulation_status(&self, ctx: &mut WorkflowContext) -> WorkflowResult<()> {
        let (Some(simulation), Some(training)) = (ctx.simulation_job.as_ref(), ctx.training_job.as_mut()) else {
            return Err(WorkflowError::MissingState("simulation job or training job details"));
        };

        let body = self
            .services
            .artifacts
            .get_string(&simulation.heartbeat_location)
            .await
            .map_err(|e| {
                error!(location = %simulation.heartbeat_location, error = %e, "Error fetching simulation heartbeat file");
                WorkflowError::Artifacts(e)
            })?;
        let Some(body) = body else {
            warn!(job_name = %ctx.job_name, "Simulation heartbeat file does not exist yet");
            return Ok(());
        };

        let heartbeat: SimulationHeartbeat = serde_json::from_str(&body)?;
        debug!(job_name = %ctx.job_name, status = ?heartbeat.job_status, "Read simulation heartbeat");
        if heartbeat.job_status == SimulationJobStatus::Failed {
            warn!(job_name = %ctx.job_name, message = ?heartbeat.message, "Simulation reported failure, stopping backend job");
            self.services.backend.stop_job(&training.name).await.map_err(WorkflowError::Backend)?;
            training.status = Some(BackendJobStatus::Stopped);
            return Err(WorkflowError::SimulationFailed(heartbeat.message.unwrap_or_default()));
        }
        Ok(())
    }

    async fn check_backend_status(&self, ctx: &mut WorkflowContext) -> WorkflowResult<()> {
        let training = ctx.training_job.as_mut().ok_or(WorkflowError::MissingState("training job details"))?;
        let description = self.services.backend.describe_job(&training.name).await.map_err(WorkflowError::Backend)?;
        if training.status != Some(description.status) {
            info!(job_name = %training.name, status = ?description.status, "Backend job status changed");
        }
        training.status = Some(description.status);
        Ok(())
    }

    /// Refreshes the viewing URL only when it is missing or expired, so a
    /// still-valid URL never triggers a job write. Lookup failures leave the
    /// cached URL untouched.
    async fn check_video_stream_url(&self, ctx: &mut WorkflowContext) {
        let in_progress = ctx.backend_status() == Some(BackendJobStatus::InProgress);
        let Some(stream) = ctx.video_stream.as_mut().filter(|_| in_progress) else {
            debug!(job_name = %ctx.job_name, "Backend job not in progress or no video stream, skipping URL check");
            return;
        };

        let now = Utc::now();
        if !stream.needs_url_refresh(now) {
            return;
        }

        info!(stream = %stream.name, "Video stream URL does not exist or is expired, refreshing");
        match self.services.video.viewing_url(&stream.name, VIEWING_URL_EXPIRY).await {
            Ok(url) => {
                stream.url = Some(url);
                stream.url_expiration = chrono::Duration::from_std(VIEWING_URL_EXPIRY).ok().map(|ttl| now + ttl);
            }
            Err(err) => warn!(stream = %stream.name, error = %err, "Unable to fetch video stream URL"),
        }
    }

    /// Writes the URL and `IN_PROGRESS` only when the URL changed. Failures are
    /// diagnostics: the backend status, not this write, decides the outcome.
    async fn persist(&self, previous_url: Option<String>, ctx: &mut WorkflowContext) {
        let current_url = ctx.video_stream.as_ref().and_then(|stream| stream.url.clone());
        if current_url == previous_url {
            return;
        }

        let update = JobUpdate::status(JobStatus::InProgress).with_video_stream_url(current_url);
        if let Err(err) = self.helper.update_job(ctx, update).await {
            error!(job_name = %ctx.job_name, error = %err, "Unable to update job");
            ctx.diagnostics.push(ErrorDetails::from_error(&err));
        }
    }
}

#[async_trait]
impl PhaseHandler for JobMonitor {
    fn phase(&self) -> Phase {
        Phase::Monitor
    }

    async fn handle(&self, mut ctx: WorkflowContext) -> WorkflowContext {
        debug!(job_name = %ctx.job_name, "START JobMonitor task");
        let previous_url = ctx.video_stream.as_ref().and_then(|stream| stream.url.clone());

        if let Err(err) = self.monitor(&mut ctx).await {
            error!(job_name = %ctx.job_name, error = %err, "Job monitoring failed");
            record_failure(&mut ctx, &err);
        }
        self.persist(previous_url, &mut ctx).await;

        debug!(job_name = %ctx.job_name, status = ?ctx.backend_status(), "END JobMonitor task");
        ctx
    }
}
