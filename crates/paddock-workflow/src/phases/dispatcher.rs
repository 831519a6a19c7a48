use crate::context::WorkflowContext;
use crate::engine::WorkflowStarter;
use crate::error::{WorkflowError, WorkflowResult};
use crate::queue::{JobMessage, JobQueue, QueueMessage};
use crate::services::ComputeBackend;
use paddock_core::{JobKey, JobStatus, RecordStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Pause before every execution start, keeps backend submissions spaced out.
    pub dispatch_delay: Duration,
    /// Wait between receives when the queue is empty or a dispatch failed.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { dispatch_delay: Duration::from_secs(4), poll_interval: Duration::from_secs(1) }
    }
}

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started { execution_id: String },
    /// The job was canceled before dispatch; no execution was started.
    Discarded,
}

/// Consumes the job queue one message at a time and starts an execution per job.
pub struct JobDispatcher {
    store: Arc<dyn RecordStore>,
    backend: Arc<dyn ComputeBackend>,
    starter: Arc<dyn WorkflowStarter>,
    queue: Arc<dyn JobQueue>,
    config: DispatcherConfig,
}

impl JobDispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        backend: Arc<dyn ComputeBackend>,
        starter: Arc<dyn WorkflowStarter>,
        queue: Arc<dyn JobQueue>,
        config: DispatcherConfig,
    ) -> Self {
        Self { store, backend, starter, queue, config }
    }

    /// Handles one delivered message. Any error leaves the message on the
    /// queue so it is redelivered after its visibility timeout.
    pub async fn dispatch(&self, message: &QueueMessage) -> WorkflowResult<DispatchOutcome> {
        let job_message: JobMessage =
            serde_json::from_str(&message.body).map_err(|e| WorkflowError::InvalidMessage(e.to_string()))?;
        let job_name = job_message.job_name;
        info!(job_name = %job_name, receive_count = message.receive_count, "Dispatching job");

        let key = JobKey::for_job(
            &job_name,
            &job_message.model_id,
            &job_message.profile_id,
            job_message.leaderboard_id.as_deref(),
        )?;
        let job = self.store.get_job(&key).await?;
        if job.status == JobStatus::Canceled {
            info!(job_name = %job_name, "Job was canceled, discarding message");
            return Ok(DispatchOutcome::Discarded);
        }

        tokio::time::sleep(self.config.dispatch_delay).await;

        if !self.backend.has_capacity().await.map_err(WorkflowError::Backend)? {
            warn!(job_name = %job_name, "No training capacity available");
            return Err(WorkflowError::NoCapacity);
        }

        let execution_name = job_name.to_string();
        let ctx = WorkflowContext::new(
            job_name,
            job_message.model_id,
            job_message.profile_id,
            job_message.leaderboard_id,
        );
        let execution_id = self.starter.start_execution(&execution_name, ctx).await?;
        info!(job_name = %execution_name, execution_id = %execution_id, "Started job execution");
        Ok(DispatchOutcome::Started { execution_id })
    }

    /// Receives and dispatches at most one message.
    ///
    /// Returns `Ok(None)` when the queue had nothing visible. The message is
    /// acknowledged only after a successful dispatch.
    pub async fn process_next(&self) -> WorkflowResult<Option<DispatchOutcome>> {
        let Some(message) = self.queue.receive().await.map_err(WorkflowError::Queue)? else {
            return Ok(None);
        };

        match self.dispatch(&message).await {
            Ok(outcome) => {
                self.queue.ack(&message.receipt).await.map_err(WorkflowError::Queue)?;
                Ok(Some(outcome))
            }
            Err(err) => {
                error!(receive_count = message.receive_count, error = %err, "Dispatch failed, leaving message for redelivery");
                Err(err)
            }
        }
    }

    /// Dispatches until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Job dispatcher started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Job dispatcher shutdown signal received");
                    break;
                }
                result = self.process_next() => {
                    match result {
                        Ok(Some(outcome)) => debug!(?outcome, "Message dispatched"),
                        Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                        Err(err) => {
                            warn!(error = %err, "Dispatcher backing off after error");
                            tokio::time::sleep(self.config.poll_interval).await;
                        }
                    }
                }
            }
        }
        info!("Job dispatcher stopped");
    }
}
