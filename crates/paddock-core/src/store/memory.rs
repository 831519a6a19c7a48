use super::RecordStore;
use crate::error::{CoreError, CoreResult};
use crate::job::{JobKey, JobRecord, JobUpdate};
use crate::leaderboard::{LeaderboardRecord, RankingRecord};
use crate::model::{ModelRecord, ModelUpdate};
use crate::profile::{AccountUsageRecord, ProfileRecord, UsageCharge};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    jobs: HashMap<String, JobRecord>,
    models: HashMap<String, ModelRecord>,
    profiles: HashMap<String, ProfileRecord>,
    leaderboards: HashMap<String, LeaderboardRecord>,
    rankings: HashMap<String, RankingRecord>,
    account_usage: HashMap<String, AccountUsageRecord>,
}

/// Process-local store, used by tests and single-process runs.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: Mutex<Tables>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> CoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| CoreError::LockPoisoned)
    }
}

fn model_key(profile_id: &str, model_id: &str) -> String {
    format!("{profile_id}#{model_id}")
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_job(&self, key: &JobKey) -> CoreResult<JobRecord> {
        let key = key.storage_key();
        self.tables()?.jobs.get(&key).cloned().ok_or_else(|| CoreError::not_found("job", key))
    }

    async fn put_job(&self, job: JobRecord) -> CoreResult<()> {
        let key = job.key()?.storage_key();
        self.tables()?.jobs.insert(key, job);
        Ok(())
    }

    async fn update_job(&self, key: &JobKey, update: JobUpdate) -> CoreResult<JobRecord> {
        let key = key.storage_key();
        let mut tables = self.tables()?;
        let job = tables.jobs.get_mut(&key).ok_or_else(|| CoreError::not_found("job", key.clone()))?;
        update.apply(job);
        Ok(job.clone())
    }

    async fn get_model(&self, profile_id: &str, model_id: &str) -> CoreResult<ModelRecord> {
        let key = model_key(profile_id, model_id);
        self.tables()?.models.get(&key).cloned().ok_or_else(|| CoreError::not_found("model", key))
    }

    async fn put_model(&self, model: ModelRecord) -> CoreResult<()> {
        let key = model_key(&model.profile_id, &model.model_id);
        self.tables()?.models.insert(key, model);
        Ok(())
    }

    async fn update_model(&self, profile_id: &str, model_id: &str, update: ModelUpdate) -> CoreResult<ModelRecord> {
        let key = model_key(profile_id, model_id);
        let mut tables = self.tables()?;
        let model = tables.models.get_mut(&key).ok_or_else(|| CoreError::not_found("model", key.clone()))?;
        update.apply(model);
        Ok(model.clone())
    }

    async fn get_profile(&self, profile_id: &str) -> CoreResult<ProfileRecord> {
        self.tables()?
            .profiles
            .get(profile_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("profile", profile_id))
    }

    async fn put_profile(&self, profile: ProfileRecord) -> CoreResult<()> {
        self.tables()?.profiles.insert(profile.profile_id.clone(), profile);
        Ok(())
    }

    async fn reconcile_usage(&self, job_key: &JobKey, profile_id: &str, charge: &UsageCharge) -> CoreResult<bool> {
        let key = job_key.storage_key();
        let mut tables = self.tables()?;
        let job = tables.jobs.get(&key).ok_or_else(|| CoreError::not_found("job", key.clone()))?;
        if job.usage_reconciled {
            return Ok(false);
        }
        if !tables.profiles.contains_key(profile_id) {
            return Err(CoreError::not_found("profile", profile_id));
        }

        let month = AccountUsageRecord::storage_key(charge.year, charge.month);
        if let Some(account) = tables.account_usage.get_mut(&month) {
            charge.apply_to_account(account);
        }
        if let Some(profile) = tables.profiles.get_mut(profile_id) {
            charge.apply_to_profile(profile);
        }
        if let Some(job) = tables.jobs.get_mut(&key) {
            job.usage_reconciled = true;
        }
        Ok(true)
    }

    async fn get_leaderboard(&self, leaderboard_id: &str) -> CoreResult<LeaderboardRecord> {
        self.tables()?
            .leaderboards
            .get(leaderboard_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("leaderboard", leaderboard_id))
    }

    async fn put_leaderboard(&self, leaderboard: LeaderboardRecord) -> CoreResult<()> {
        self.tables()?.leaderboards.insert(leaderboard.leaderboard_id.clone(), leaderboard);
        Ok(())
    }

    async fn increment_participant_count(&self, leaderboard_id: &str) -> CoreResult<u32> {
        let mut tables = self.tables()?;
        let leaderboard = tables
            .leaderboards
            .get_mut(leaderboard_id)
            .ok_or_else(|| CoreError::not_found("leaderboard", leaderboard_id))?;
        leaderboard.participant_count += 1;
        Ok(leaderboard.participant_count)
    }

    async fn get_ranking(&self, leaderboard_id: &str, profile_id: &str) -> CoreResult<Option<RankingRecord>> {
        let key = RankingRecord::storage_key(leaderboard_id, profile_id);
        Ok(self.tables()?.rankings.get(&key).cloned())
    }

    async fn put_ranking(&self, ranking: RankingRecord) -> CoreResult<()> {
        let key = RankingRecord::storage_key(&ranking.leaderboard_id, &ranking.profile_id);
        self.tables()?.rankings.insert(key, ranking);
        Ok(())
    }

    async fn get_account_usage(&self, year: i32, month: u32) -> CoreResult<Option<AccountUsageRecord>> {
        let key = AccountUsageRecord::storage_key(year, month);
        Ok(self.tables()?.account_usage.get(&key).cloned())
    }

    async fn put_account_usage(&self, usage: AccountUsageRecord) -> CoreResult<()> {
        let key = AccountUsageRecord::storage_key(usage.year, usage.month);
        self.tables()?.account_usage.insert(key, usage);
        Ok(())
    }
}
