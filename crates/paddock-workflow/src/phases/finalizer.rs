use super::{Phase, PhaseHandler, Services, record_failure};
use crate::context::{BackendJobStatus, WorkflowContext};
use crate::error::{ErrorDetails, WorkflowError, WorkflowResult};
use crate::helper::WorkflowHelper;
use crate::performance::{load_metrics, ranking_score, submission_stats};
use crate::services::LogType;
use crate::telemetry::JobOutcomeEvent;
use crate::usage;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use paddock_core::{
    JobKind, JobRecord, JobStatus, JobUpdate, LeaderboardRecord, ModelStatus, ModelUpdate, RankingRecord,
    SubmissionStats,
};
use tracing::{error, info, warn};

/// Terminal workflow step. Runs once whether the earlier phases succeeded or
/// not, tears down backend resources and commits the terminal status.
pub struct JobFinalizer {
    services: Services,
    helper: WorkflowHelper,
}

impl JobFinalizer {
    #[must_use]
    pub fn new(services: Services) -> Self {
        let helper = WorkflowHelper::new(services.store.clone());
        Self { services, helper }
    }

    async fn finalize(&self, ctx: &mut WorkflowContext) -> WorkflowResult<()> {
        if let Some(stream) = &ctx.video_stream {
            info!(stream = %stream.name, "Deleting video stream");
            match self.services.video.delete_stream(&stream.arn).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    warn!(stream = %stream.name, "Video stream already deleted");
                }
                Err(err) => return Err(WorkflowError::VideoStream(err)),
            }
        }

        let Some(training) = ctx.training_job.as_mut() else {
            info!(job_name = %ctx.job_name, "No backend job was created, nothing to tear down");
            return Ok(());
        };

        // Only reachable when the monitor loop ended without a terminal status.
        if matches!(training.status, None | Some(BackendJobStatus::InProgress)) {
            info!(job_name = %training.name, status = ?training.status, "Backend job not terminal, stopping");
            self.services.backend.stop_job(&training.name).await.map_err(WorkflowError::Backend)?;
            training.status = Some(BackendJobStatus::Stopped);
        }

        let description = self.services.backend.describe_job(&training.name).await.map_err(WorkflowError::Backend)?;

        if ctx.job_kind == JobKind::Training && training.status.is_some_and(BackendJobStatus::produced_artifact) {
            training.model_artifact_location.clone_from(&description.model_artifact_location);
        }

        let log_failures = self.ship_logs(ctx).await;
        ctx.diagnostics.extend(log_failures);

        let compute_usage = usage::compute_usage(&description);
        ctx.compute_usage = Some(compute_usage);
        usage::reconcile(self.services.store.as_ref(), &ctx.job_key()?, &ctx.profile_id, compute_usage, Utc::now())
            .await?;
        Ok(())
    }

    /// Copies the job's log streams into the artifact store. Every stream is
    /// shipped independently; failures come back as diagnostics.
    async fn ship_logs(&self, ctx: &WorkflowContext) -> Vec<ErrorDetails> {
        let now = Utc::now();
        let job_name = ctx.job_name.to_string();
        let shipments = LogType::for_job(ctx.job_kind).iter().map(|&log_type| {
            let location =
                self.services.layout.logs(&ctx.profile_id, &ctx.model_id, &ctx.job_name, log_type.as_str(), now);
            let job_name = job_name.as_str();
            async move {
                let body = self
                    .services
                    .logs
                    .read_stream(log_type.log_group(ctx.job_kind), job_name)
                    .await
                    .map_err(WorkflowError::Logs)?;
                self.services
                    .artifacts
                    .put(&location, body.into_bytes())
                    .await
                    .map_err(WorkflowError::Artifacts)?;
                Ok::<_, WorkflowError>((log_type, location))
            }
        });

        let mut failures = Vec::new();
        let mut update = JobUpdate::default();
        for result in join_all(shipments).await {
            match result {
                Ok((LogType::Training, location)) => update.training_logs_location = Some(location),
                Ok((LogType::Simulation, location)) => update.simulation_logs_location = Some(location),
                Err(err) => {
                    error!(job_name = %ctx.job_name, error = %err, "Error shipping job logs");
                    failures.push(ErrorDetails::from_error(&err));
                }
            }
        }

        if update != JobUpdate::default() {
            if let Err(err) = self.helper.update_job(ctx, update).await {
                error!(job_name = %ctx.job_name, error = %err, "Error recording job log locations");
                failures.push(ErrorDetails::from_error(&err));
            }
        }
        failures
    }

    async fn persist(&self, ctx: &mut WorkflowContext) {
        let failed = ctx.has_failed() || ctx.backend_status() == Some(BackendJobStatus::Failed);
        let mut job_status = if failed { JobStatus::Failed } else { JobStatus::Completed };
        if let Err(err) = self.commit(ctx, &mut job_status).await {
            error!(job_name = %ctx.job_name, error = %err, "Error persisting workflow data");
            record_failure(ctx, &err);
        }

        let event = JobOutcomeEvent {
            job_name: ctx.job_name.to_string(),
            job_kind: ctx.job_kind,
            job_status,
            model_id: ctx.model_id.clone(),
            leaderboard_id: ctx.leaderboard_id.clone(),
            billed_minutes: ctx.compute_usage.map_or(0.0, |usage| usage.billed_minutes()),
            emitted_at: Utc::now(),
        };
        self.services.outcomes.on_outcome(event);
    }

    /// Writes the terminal job and model status.
    ///
    /// `job_status` arrives as the computed terminal status and is only
    /// overridden to `CANCELED`, so it stays accurate for the outcome event
    /// even when this fails midway.
    async fn commit(&self, ctx: &mut WorkflowContext, job_status: &mut JobStatus) -> WorkflowResult<()> {
        // Jobs can be canceled at any point after dispatch.
        let job = self.helper.get_job(ctx).await?;
        if job.status == JobStatus::Canceled {
            info!(job_name = %ctx.job_name, "Job was canceled, preserving CANCELED status");
            *job_status = JobStatus::Canceled;
            return Ok(());
        }

        let model_status = ModelStatus::after_job(ctx.job_kind, *job_status == JobStatus::Failed);

        let post_processing = match ctx.job_kind {
            JobKind::Training => Ok(()),
            JobKind::Evaluation => self.persist_evaluation_metrics(ctx, &job).await,
            JobKind::Submission => self.persist_submission_stats(ctx, &job).await,
        };
        if let Err(err) = post_processing {
            error!(job_name = %ctx.job_name, error = %err, "Error persisting job results");
            record_failure(ctx, &err);
        }

        let model_update = ModelUpdate {
            status: Some(model_status),
            model_artifact_location: match ctx.job_kind {
                JobKind::Training => ctx.training_job.as_ref().and_then(|t| t.model_artifact_location.clone()),
                JobKind::Evaluation | JobKind::Submission => None,
            },
        };
        let job_update = JobUpdate::status(*job_status)
            .with_end_time(Utc::now())
            .with_video_stream_url(None)
            .with_error_message(ctx.error_details.as_ref().map(ToString::to_string));

        let store = self.services.store.as_ref();
        tokio::try_join!(
            async { store.update_model(&ctx.profile_id, &ctx.model_id, model_update).await.map_err(WorkflowError::from) },
            self.helper.update_job(ctx, job_update),
        )?;
        info!(job_name = %ctx.job_name, status = ?job_status, model_status = ?model_status, "Committed terminal status");
        Ok(())
    }

    async fn persist_evaluation_metrics(&self, ctx: &WorkflowContext, job: &JobRecord) -> WorkflowResult<()> {
        let metrics = load_metrics(self.services.artifacts.as_ref(), &job.asset_locations.metrics).await?;
        info!(job_name = %ctx.job_name, trials = metrics.len(), "Attaching evaluation metrics");
        self.helper
            .update_job(ctx, JobUpdate { metrics: Some(metrics), ..JobUpdate::default() })
            .await?;
        Ok(())
    }

    async fn persist_submission_stats(&self, ctx: &WorkflowContext, job: &JobRecord) -> WorkflowResult<()> {
        let leaderboard_id = ctx.leaderboard_id.as_deref().ok_or(WorkflowError::MissingState("leaderboard id"))?;
        let store = self.services.store.as_ref();
        let (leaderboard, metrics) = tokio::try_join!(
            async { store.get_leaderboard(leaderboard_id).await.map_err(WorkflowError::from) },
            load_metrics(self.services.artifacts.as_ref(), &job.asset_locations.metrics),
        )?;

        let stats = submission_stats(&metrics, leaderboard.minimum_laps);
        let score = ranking_score(&stats, leaderboard.timing_method);
        let completed = stats.completed_lap_count;

        if completed == 0 {
            info!(job_name = %ctx.job_name, "Submission has no completed laps, not updating submission performance");
            return Ok(());
        }

        info!(job_name = %ctx.job_name, completed_lap_count = completed, "Updating submission performance");
        self.helper
            .update_job(
                ctx,
                JobUpdate { stats: Some(stats.clone()), ranking_score: Some(score), ..JobUpdate::default() },
            )
            .await?;

        if completed < leaderboard.minimum_laps {
            info!(
                job_name = %ctx.job_name,
                completed_lap_count = completed,
                minimum_laps = leaderboard.minimum_laps,
                "Submission did not meet leaderboard requirements, skipping ranking"
            );
            return Ok(());
        }
        let Some(score) = score else {
            warn!(job_name = %ctx.job_name, timing_method = ?leaderboard.timing_method, "Submission has no ranking score");
            return Ok(());
        };
        self.persist_ranking(ctx, job, &leaderboard, stats, score).await
    }

    /// Creates the profile's first ranking or replaces a strictly worse one.
    async fn persist_ranking(
        &self,
        ctx: &WorkflowContext,
        job: &JobRecord,
        leaderboard: &LeaderboardRecord,
        stats: SubmissionStats,
        score: u64,
    ) -> WorkflowResult<()> {
        let store = self.services.store.as_ref();
        let leaderboard_id = leaderboard.leaderboard_id.as_str();
        let (existing, profile) = tokio::try_join!(
            async { store.get_ranking(leaderboard_id, &ctx.profile_id).await.map_err(WorkflowError::from) },
            async { store.get_profile(&ctx.profile_id).await.map_err(WorkflowError::from) },
        )?;

        let ranking = RankingRecord {
            leaderboard_id: leaderboard_id.to_string(),
            profile_id: ctx.profile_id.clone(),
            model_id: ctx.model_id.clone(),
            model_name: job.model_name.clone(),
            ranking_score: score,
            stats,
            submission_id: ctx.job_name.id().to_string(),
            submission_number: job.submission_number,
            submission_video_location: job.asset_locations.primary_video.clone(),
            user_alias: profile.alias,
            user_avatar: profile.avatar,
        };

        match existing {
            None => {
                info!(profile_id = %ctx.profile_id, leaderboard_id, "No ranking found for profile, creating ranking");
                store.put_ranking(ranking).await?;
                let participants = store.increment_participant_count(leaderboard_id).await?;
                info!(leaderboard_id, participants, "Leaderboard participant added");
            }
            Some(current) if score < current.ranking_score => {
                info!(
                    profile_id = %ctx.profile_id,
                    leaderboard_id,
                    submission_score = score,
                    ranking_score = current.ranking_score,
                    "Submission beats current ranking, updating ranking"
                );
                store.put_ranking(ranking).await?;
            }
            Some(current) => {
                info!(
                    profile_id = %ctx.profile_id,
                    leaderboard_id,
                    submission_score = score,
                    ranking_score = current.ranking_score,
                    "Submission does not beat current ranking, keeping ranking"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PhaseHandler for JobFinalizer {
    fn phase(&self) -> Phase {
        Phase::Finalize
    }

    async fn handle(&self, mut ctx: WorkflowContext) -> WorkflowContext {
        info!(job_name = %ctx.job_name, failed = ctx.has_failed(), "START JobFinalizer task");
        if let Err(err) = self.finalize(&mut ctx).await {
            error!(job_name = %ctx.job_name, error = %err, "Job finalization failed");
            record_failure(&mut ctx, &err);
        }
        self.persist(&mut ctx).await;
        info!(job_name = %ctx.job_name, failed = ctx.has_failed(), "END JobFinalizer task");
        ctx
    }
}
