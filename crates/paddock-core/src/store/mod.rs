//! Record persistence.
//!
//! Every phase handler reads and writes records through [`RecordStore`]. All
//! mutations are partial updates keyed by record identity; the store never
//! replaces a whole job record on behalf of a phase.

mod memory;
mod sqlite;

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use crate::error::CoreResult;
use crate::job::{JobKey, JobRecord, JobUpdate};
use crate::leaderboard::{LeaderboardRecord, RankingRecord};
use crate::model::{ModelRecord, ModelUpdate};
use crate::profile::{AccountUsageRecord, ProfileRecord, UsageCharge};
use async_trait::async_trait;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Loads a job, failing with `NotFound` when absent.
    async fn get_job(&self, key: &JobKey) -> CoreResult<JobRecord>;

    async fn put_job(&self, job: JobRecord) -> CoreResult<()>;

    /// Applies a partial update and returns the stored record.
    ///
    /// A `CANCELED` job keeps its status, see [`JobUpdate::apply`].
    async fn update_job(&self, key: &JobKey, update: JobUpdate) -> CoreResult<JobRecord>;

    async fn get_model(&self, profile_id: &str, model_id: &str) -> CoreResult<ModelRecord>;

    async fn put_model(&self, model: ModelRecord) -> CoreResult<()>;

    async fn update_model(&self, profile_id: &str, model_id: &str, update: ModelUpdate) -> CoreResult<ModelRecord>;

    async fn get_profile(&self, profile_id: &str) -> CoreResult<ProfileRecord>;

    async fn put_profile(&self, profile: ProfileRecord) -> CoreResult<()>;

    /// Applies `charge` to the monthly account counter (when that month has a
    /// record) and to the profile counter, and marks the job reconciled, all
    /// in one atomic step.
    ///
    /// Returns `false` without touching any counter when the job was already
    /// reconciled.
    async fn reconcile_usage(&self, job_key: &JobKey, profile_id: &str, charge: &UsageCharge) -> CoreResult<bool>;

    async fn get_leaderboard(&self, leaderboard_id: &str) -> CoreResult<LeaderboardRecord>;

    async fn put_leaderboard(&self, leaderboard: LeaderboardRecord) -> CoreResult<()>;

    /// Atomically adds one participant and returns the new count.
    async fn increment_participant_count(&self, leaderboard_id: &str) -> CoreResult<u32>;

    async fn get_ranking(&self, leaderboard_id: &str, profile_id: &str) -> CoreResult<Option<RankingRecord>>;

    /// Creates or replaces the ranking for `(leaderboard_id, profile_id)`.
    async fn put_ranking(&self, ranking: RankingRecord) -> CoreResult<()>;

    async fn get_account_usage(&self, year: i32, month: u32) -> CoreResult<Option<AccountUsageRecord>>;

    async fn put_account_usage(&self, usage: AccountUsageRecord) -> CoreResult<()>;
}
