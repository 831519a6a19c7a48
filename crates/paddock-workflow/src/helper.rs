use crate::context::WorkflowContext;
use crate::error::WorkflowResult;
use paddock_core::{JobRecord, JobUpdate, RecordStore};
use std::sync::Arc;
use tracing::debug;

/// Loads and updates the job record a workflow context refers to.
#[derive(Clone)]
pub struct WorkflowHelper {
    store: Arc<dyn RecordStore>,
}

impl WorkflowHelper {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub async fn get_job(&self, ctx: &WorkflowContext) -> WorkflowResult<JobRecord> {
        let key = ctx.job_key()?;
        Ok(self.store.get_job(&key).await?)
    }

    pub async fn update_job(&self, ctx: &WorkflowContext, update: JobUpdate) -> WorkflowResult<JobRecord> {
        let key = ctx.job_key()?;
        debug!(job_name = %ctx.job_name, ?update, "Updating job");
        Ok(self.store.update_job(&key, update).await?)
    }
}
