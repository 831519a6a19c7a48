//! Workflow engine that runs one execution per job.
//!
//! An execution walks the step cursor Initialize → Monitor (repeated every
//! `monitor_interval` while the backend job is active) → Finalize. Each step
//! runs in its own task under a timeout. A timed-out or panicking step is
//! retried per [`RetryPolicy`]; once attempts are exhausted the failure is
//! recorded on the context and the execution routes straight to the
//! finalizer.

use crate::context::{BackendJobStatus, WorkflowContext};
use crate::error::{WorkflowError, WorkflowResult};
use crate::phases::{JobFinalizer, JobInitializer, JobMonitor, Phase, PhaseHandler, Services, record_failure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_rate: f64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        self.initial_backoff.mul_f64(self.backoff_rate.max(1.0).powi(exponent))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff: Duration::from_secs(5), backoff_rate: 2.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub initialize_timeout: Duration,
    pub monitor_timeout: Duration,
    pub finalize_timeout: Duration,
    /// Wait before every monitor invocation.
    pub monitor_interval: Duration,
    pub retry: RetryPolicy,
    /// How long a finished execution stays visible to `describe_execution`
    /// and `wait_for`. Older ones are pruned on the next start, after which
    /// the name can be started again.
    pub execution_retention: Duration,
}

impl EngineConfig {
    #[must_use]
    pub const fn step_timeout(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Initialize => self.initialize_timeout,
            Phase::Monitor => self.monitor_timeout,
            Phase::Finalize => self.finalize_timeout,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initialize_timeout: Duration::from_secs(5 * 60),
            monitor_timeout: Duration::from_secs(60),
            finalize_timeout: Duration::from_secs(15 * 60),
            monitor_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            execution_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

/// Result of a finished execution.
///
/// `Failed` only says the finalizer saw error details; the job record's
/// status stays the source of truth for the job itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub context: WorkflowContext,
    pub finished_at: DateTime<Utc>,
}

/// Starts named executions. Implemented by [`WorkflowEngine`]; the
/// dispatcher only depends on this trait.
#[async_trait]
pub trait WorkflowStarter: Send + Sync {
    /// Starts an execution and returns its id.
    ///
    /// Starting a name that is still running returns the running execution's
    /// id. A name whose execution already finished is rejected with
    /// [`WorkflowError::ExecutionAlreadyExists`] until it falls out of the
    /// engine's retention window.
    async fn start_execution(&self, name: &str, ctx: WorkflowContext) -> WorkflowResult<String>;
}

struct Execution {
    execution_id: String,
    outcome: watch::Receiver<Option<ExecutionOutcome>>,
}

impl Execution {
    fn finished_before(&self, horizon: DateTime<Utc>) -> bool {
        self.outcome.borrow().as_ref().is_some_and(|outcome| outcome.finished_at <= horizon)
    }
}

struct EngineInner {
    config: EngineConfig,
    initializer: Arc<dyn PhaseHandler>,
    monitor: Arc<dyn PhaseHandler>,
    finalizer: Arc<dyn PhaseHandler>,
    executions: Mutex<HashMap<String, Execution>>,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Creates an engine running the standard phase handlers.
    #[must_use]
    pub fn new(config: EngineConfig, services: Services) -> Self {
        Self::with_handlers(
            config,
            Arc::new(JobInitializer::new(services.clone())),
            Arc::new(JobMonitor::new(services.clone())),
            Arc::new(JobFinalizer::new(services)),
        )
    }

    /// Creates an engine with custom phase handlers.
    ///
    /// # Arguments
    /// * `config` - Step timeouts, monitor interval and retry policy
    /// * `initializer` - Handler for the first step
    /// * `monitor` - Handler re-invoked while the backend job is active
    /// * `finalizer` - Handler that always runs last
    #[must_use]
    pub fn with_handlers(
        config: EngineConfig,
        initializer: Arc<dyn PhaseHandler>,
        monitor: Arc<dyn PhaseHandler>,
        finalizer: Arc<dyn PhaseHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                initializer,
                monitor,
                finalizer,
                executions: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Runs all steps of one job to completion and returns the final context.
    pub async fn run(&self, ctx: WorkflowContext) -> WorkflowContext {
        let mut ctx = self.run_step(Phase::Initialize, ctx).await;

        while !ctx.has_failed() {
            tokio::time::sleep(self.inner.config.monitor_interval).await;
            ctx = self.run_step(Phase::Monitor, ctx).await;
            if !ctx.backend_status().is_some_and(BackendJobStatus::is_active) {
                break;
            }
        }

        self.run_step(Phase::Finalize, ctx).await
    }

    async fn run_step(&self, phase: Phase, mut ctx: WorkflowContext) -> WorkflowContext {
        let handler = self.handler(phase);
        let timeout = self.inner.config.step_timeout(phase);
        let retry = self.inner.config.retry;
        let mut attempt = 1;

        loop {
            let task = tokio::spawn({
                let handler = Arc::clone(&handler);
                let input = ctx.clone();
                async move { handler.handle(input).await }
            });
            let abort = task.abort_handle();

            let err = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(output)) => return output,
                Ok(Err(join_error)) => {
                    WorkflowError::StepAborted { phase: phase.as_str(), reason: join_error.to_string() }
                }
                Err(_) => {
                    abort.abort();
                    WorkflowError::StepTimedOut { phase: phase.as_str(), after: timeout }
                }
            };

            if attempt >= retry.max_attempts {
                error!(job_name = %ctx.job_name, %phase, attempt, error = %err, "Step failed, retries exhausted");
                record_failure(&mut ctx, &err);
                return ctx;
            }

            let backoff = retry.backoff(attempt);
            warn!(job_name = %ctx.job_name, %phase, attempt, ?backoff, error = %err, "Step failed, retrying");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    fn handler(&self, phase: Phase) -> Arc<dyn PhaseHandler> {
        match phase {
            Phase::Initialize => Arc::clone(&self.inner.initializer),
            Phase::Monitor => Arc::clone(&self.inner.monitor),
            Phase::Finalize => Arc::clone(&self.inner.finalizer),
        }
    }

    /// Waits until the named execution finishes. `None` for unknown names.
    pub async fn wait_for(&self, name: &str) -> Option<ExecutionOutcome> {
        let mut outcome = self.receiver(name)?;
        let finished = outcome.wait_for(Option::is_some).await.ok()?;
        finished.clone()
    }

    #[must_use]
    pub fn describe_execution(&self, name: &str) -> Option<ExecutionStatus> {
        let outcome = self.receiver(name)?;
        let status = outcome.borrow().as_ref().map_or(ExecutionStatus::Running, |outcome| outcome.status);
        Some(status)
    }

    fn receiver(&self, name: &str) -> Option<watch::Receiver<Option<ExecutionOutcome>>> {
        let executions = self.inner.executions.lock().ok()?;
        executions.get(name).map(|execution| execution.outcome.clone())
    }
}

#[async_trait]
impl WorkflowStarter for WorkflowEngine {
    async fn start_execution(&self, name: &str, ctx: WorkflowContext) -> WorkflowResult<String> {
        let mut executions = self
            .inner
            .executions
            .lock()
            .map_err(|_| WorkflowError::MissingState("execution table lock poisoned"))?;

        let retention = chrono::Duration::from_std(self.inner.config.execution_retention)
            .unwrap_or(chrono::Duration::MAX);
        if let Some(horizon) = Utc::now().checked_sub_signed(retention) {
            let before = executions.len();
            executions.retain(|_, execution| !execution.finished_before(horizon));
            let pruned = before - executions.len();
            if pruned > 0 {
                debug!(pruned, "Pruned finished executions");
            }
        }

        if let Some(existing) = executions.get(name) {
            if existing.outcome.borrow().is_some() {
                return Err(WorkflowError::ExecutionAlreadyExists(name.to_string()));
            }
            info!(execution = name, execution_id = %existing.execution_id, "Execution already running");
            return Ok(existing.execution_id.clone());
        }

        let execution_id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = watch::channel(None);
        executions.insert(name.to_string(), Execution { execution_id: execution_id.clone(), outcome: receiver });
        drop(executions);

        let engine = self.clone();
        let name = name.to_string();
        let id = execution_id.clone();
        tokio::spawn(async move {
            info!(execution = %name, execution_id = %id, "Execution started");
            let context = engine.run(ctx).await;
            let status = if context.has_failed() { ExecutionStatus::Failed } else { ExecutionStatus::Succeeded };
            info!(execution = %name, execution_id = %id, ?status, "Execution finished");
            sender.send_replace(Some(ExecutionOutcome {
                execution_id: id,
                name,
                status,
                context,
                finished_at: Utc::now(),
            }));
        });

        Ok(execution_id)
    }
}
