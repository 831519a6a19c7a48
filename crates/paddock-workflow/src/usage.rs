//! Compute-minute accounting for finished jobs.
//!
//! Minutes are reserved ("queued") when a job is accepted. Once the backend
//! reports the real training time, the reservation is released and the
//! billed minutes move to "used" on both the monthly account counter and the
//! profile counter.

use crate::context::ComputeUsage;
use crate::error::WorkflowResult;
use crate::services::BackendJobDescription;
use chrono::{DateTime, Datelike, Utc};
use paddock_core::{JobKey, RecordStore, UsageCharge};
use tracing::info;

#[must_use]
pub fn compute_usage(description: &BackendJobDescription) -> ComputeUsage {
    ComputeUsage {
        minutes_queued: description.max_runtime_seconds.map_or(0.0, |s| s as f64 / 60.0),
        minutes_used: description.training_time_seconds.map_or(0.0, |s| s as f64 / 60.0),
    }
}

/// Applies `usage` to the account and profile counters once per job.
///
/// The counters and the job's reconciled flag change in one store operation,
/// so an attempt aborted midway never leaves a half-applied charge behind.
/// Returns `false` when the job was already reconciled by an earlier attempt.
pub async fn reconcile(
    store: &dyn RecordStore,
    job_key: &JobKey,
    profile_id: &str,
    usage: ComputeUsage,
    at: DateTime<Utc>,
) -> WorkflowResult<bool> {
    let charge = UsageCharge {
        year: at.year(),
        month: at.month(),
        minutes_queued: usage.minutes_queued,
        minutes_billed: usage.billed_minutes(),
    };

    if !store.reconcile_usage(job_key, profile_id, &charge).await? {
        info!(job_key = %job_key, "Compute usage already reconciled for job, skipping");
        return Ok(false);
    }

    info!(
        job_key = %job_key,
        profile_id,
        minutes_queued = usage.minutes_queued,
        minutes_used = usage.minutes_used,
        billed_minutes = charge.minutes_billed,
        "Reconciled compute usage"
    );
    Ok(true)
}
