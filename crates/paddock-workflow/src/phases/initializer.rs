use super::{Phase, PhaseHandler, Services, record_failure};
use crate::context::{SimulationJob, TrainingJob, VideoStream, WorkflowContext};
use crate::error::{WorkflowError, WorkflowResult};
use crate::files::{ModelMetadataFile, SimulationParams};
use crate::helper::WorkflowHelper;
use crate::services::{TrainingJobRequest, retention_hours};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use paddock_core::{JobKind, JobRecord, JobStatus, JobUpdate, ModelRecord, ModelStatus, ModelUpdate, ProfileRecord};
use tracing::{error, info, warn};

/// First workflow step: provisions the video stream, writes the job
/// configuration files and submits the job to the compute backend.
pub struct JobInitializer {
    services: Services,
    helper: WorkflowHelper,
}

impl JobInitializer {
    #[must_use]
    pub fn new(services: Services) -> Self {
        let helper = WorkflowHelper::new(services.store.clone());
        Self { services, helper }
    }

    async fn initialize(&self, ctx: &mut WorkflowContext) -> WorkflowResult<()> {
        let store = self.services.store.as_ref();
        let (job, model, profile) = tokio::try_join!(
            self.helper.get_job(ctx),
            async { store.get_model(&ctx.profile_id, &ctx.model_id).await.map_err(WorkflowError::from) },
            async { store.get_profile(&ctx.profile_id).await.map_err(WorkflowError::from) },
        )?;

        // `start_time` marks that an attempt got past loading, even one that
        // timed out between submitting and persisting the backend job.
        let rerun = job.backend_job_arn.is_some() || job.start_time.is_some();
        if job.start_time.is_none() {
            self.helper.update_job(ctx, JobUpdate::default().with_start_time(Utc::now())).await?;
        }

        let stream_name = ctx.job_name.to_string();
        let stream_arn = self
            .services
            .video
            .create_stream(&stream_name, retention_hours(ctx.job_kind))
            .await
            .map_err(WorkflowError::VideoStream)?;
        info!(job_name = %ctx.job_name, stream_arn = %stream_arn, "Created video stream");
        ctx.video_stream = Some(VideoStream { arn: stream_arn, name: stream_name, url: None, url_expiration: None });

        self.write_job_files(&job, &model, &profile).await?;

        // Fresh training jobs have nothing to clean up.
        if job.kind() != JobKind::Training || rerun {
            self.delete_stale_heartbeat(&job.asset_locations.simulation_heartbeat).await;
        }

        let request = TrainingJobRequest::for_job(&job, &model);
        let arn = self.services.backend.submit_job(&request).await.map_err(WorkflowError::Backend)?;
        info!(job_name = %ctx.job_name, arn = %arn, "Submitted job to compute backend");

        ctx.simulation_job = Some(SimulationJob { heartbeat_location: job.asset_locations.simulation_heartbeat.clone() });
        ctx.training_job = Some(TrainingJob {
            name: ctx.job_name.to_string(),
            arn,
            status: None,
            model_artifact_location: None,
        });
        Ok(())
    }

    /// Writes all configuration files in parallel; any failure fails the step.
    async fn write_job_files(
        &self,
        job: &JobRecord,
        model: &ModelRecord,
        profile: &ProfileRecord,
    ) -> WorkflowResult<()> {
        let artifacts = self.services.artifacts.as_ref();
        let mut writes: Vec<(String, String)> = vec![(
            job.asset_locations.simulation_params.clone(),
            SimulationParams::for_job(job, model, profile)?.to_yaml()?,
        )];
        if job.kind() == JobKind::Training {
            writes.push((
                model.asset_locations.model_metadata.clone(),
                ModelMetadataFile::for_model(model).to_json()?,
            ));
            writes.push((model.asset_locations.reward_function.clone(), model.metadata.reward_function.clone()));
        }

        let uploads: Vec<BoxFuture<'_, WorkflowResult<()>>> = writes
            .into_iter()
            .map(|(location, body)| {
                async move {
                    artifacts.put(&location, body.into_bytes()).await.map_err(WorkflowError::Artifacts)?;
                    info!(location = %location, "Wrote job file");
                    Ok(())
                }
                .boxed()
            })
            .collect();
        try_join_all(uploads).await?;
        Ok(())
    }

    async fn delete_stale_heartbeat(&self, location: &str) {
        if let Err(err) = self.services.artifacts.delete(location).await {
            warn!(location, error = %err, "Unable to delete previous simulation heartbeat file");
        }
    }

    async fn persist(&self, ctx: &mut WorkflowContext) {
        let failed = ctx.has_failed();
        let (job_status, model_status) = if failed {
            (JobStatus::Failed, ModelStatus::after_job(ctx.job_kind, true))
        } else {
            (JobStatus::Initializing, ModelStatus::while_running(ctx.job_kind))
        };

        let update = JobUpdate::status(job_status)
            .with_backend_job_arn(ctx.training_job.as_ref().map(|job| job.arn.clone()))
            .with_start_time(Utc::now())
            .with_error_message(ctx.error_details.as_ref().map(ToString::to_string));
        let store = self.services.store.as_ref();

        let result = tokio::try_join!(
            async {
                store
                    .update_model(&ctx.profile_id, &ctx.model_id, ModelUpdate::status(model_status))
                    .await
                    .map_err(WorkflowError::from)
            },
            self.helper.update_job(ctx, update),
        );
        if let Err(err) = result {
            error!(job_name = %ctx.job_name, error = %err, "Unable to update model or job");
            record_failure(ctx, &err);
        }
    }
}

#[async_trait]
impl PhaseHandler for JobInitializer {
    fn phase(&self) -> Phase {
        Phase::Initialize
    }

    async fn handle(&self, mut ctx: WorkflowContext) -> WorkflowContext {
        info!(job_name = %ctx.job_name, job_kind = %ctx.job_kind, "START JobInitializer task");
        if let Err(err) = self.initialize(&mut ctx).await {
            error!(job_name = %ctx.job_name, error = %err, "Job initialization failed");
            record_failure(&mut ctx, &err);
        }
        self.persist(&mut ctx).await;
        info!(job_name = %ctx.job_name, failed = ctx.has_failed(), "END JobInitializer task");
        ctx
    }
}
