use super::RecordStore;
use crate::error::{CoreError, CoreResult};
use crate::job::{JobKey, JobRecord, JobUpdate};
use crate::leaderboard::{LeaderboardRecord, RankingRecord};
use crate::model::{ModelRecord, ModelUpdate};
use crate::profile::{AccountUsageRecord, ProfileRecord, UsageCharge};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const JOBS: &str = "job";
const MODELS: &str = "model";
const PROFILES: &str = "profile";
const LEADERBOARDS: &str = "leaderboard";
const RANKINGS: &str = "ranking";
const ACCOUNT_USAGE: &str = "account_usage";

/// Durable record store backed by a single SQLite database.
///
/// Records are stored as JSON documents keyed by `(entity, key)`. Partial
/// updates run as read-modify-write inside one transaction.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        info!(path = %path.as_ref().display(), "Opened record store");
        Ok(store)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CoreResult<()> {
        self.lock()?.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS records (
                entity TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (entity, key)
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CoreError::LockPoisoned)
    }

    fn find<T: DeserializeOwned>(&self, entity: &'static str, key: &str) -> CoreResult<Option<T>> {
        let conn = self.lock()?;
        read(&conn, entity, key)
    }

    fn load<T: DeserializeOwned>(&self, entity: &'static str, key: &str) -> CoreResult<T> {
        self.find(entity, key)?.ok_or_else(|| CoreError::not_found(entity, key))
    }

    fn store<T: Serialize>(&self, entity: &'static str, key: &str, record: &T) -> CoreResult<()> {
        let conn = self.lock()?;
        write(&conn, entity, key, record)
    }

    /// Loads, mutates and writes back one record in a single transaction.
    fn modify<T, R>(&self, entity: &'static str, key: &str, f: impl FnOnce(&mut T) -> R) -> CoreResult<(T, R)>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut record: T = read(&tx, entity, key)?.ok_or_else(|| CoreError::not_found(entity, key))?;
        let out = f(&mut record);
        write(&tx, entity, key, &record)?;
        tx.commit()?;
        debug!(entity, key, "Updated record");
        Ok((record, out))
    }
}

fn read<T: DeserializeOwned>(conn: &Connection, entity: &str, key: &str) -> CoreResult<Option<T>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM records WHERE entity = ?1 AND key = ?2",
            params![entity, key],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| serde_json::from_str(&b)).transpose().map_err(CoreError::from)
}

fn write<T: Serialize>(conn: &Connection, entity: &str, key: &str, record: &T) -> CoreResult<()> {
    let body = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO records (entity, key, body, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(entity, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![entity, key, body, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn model_key(profile_id: &str, model_id: &str) -> String {
    format!("{profile_id}#{model_id}")
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_job(&self, key: &JobKey) -> CoreResult<JobRecord> {
        self.load(JOBS, &key.storage_key())
    }

    async fn put_job(&self, job: JobRecord) -> CoreResult<()> {
        self.store(JOBS, &job.key()?.storage_key(), &job)
    }

    async fn update_job(&self, key: &JobKey, update: JobUpdate) -> CoreResult<JobRecord> {
        let (job, ()) = self.modify(JOBS, &key.storage_key(), |job: &mut JobRecord| update.apply(job))?;
        Ok(job)
    }

    async fn get_model(&self, profile_id: &str, model_id: &str) -> CoreResult<ModelRecord> {
        self.load(MODELS, &model_key(profile_id, model_id))
    }

    async fn put_model(&self, model: ModelRecord) -> CoreResult<()> {
        self.store(MODELS, &model_key(&model.profile_id, &model.model_id), &model)
    }

    async fn update_model(&self, profile_id: &str, model_id: &str, update: ModelUpdate) -> CoreResult<ModelRecord> {
        let (model, ()) =
            self.modify(MODELS, &model_key(profile_id, model_id), |model: &mut ModelRecord| update.apply(model))?;
        Ok(model)
    }

    async fn get_profile(&self, profile_id: &str) -> CoreResult<ProfileRecord> {
        self.load(PROFILES, profile_id)
    }

    async fn put_profile(&self, profile: ProfileRecord) -> CoreResult<()> {
        self.store(PROFILES, &profile.profile_id, &profile)
    }

    async fn reconcile_usage(&self, job_key: &JobKey, profile_id: &str, charge: &UsageCharge) -> CoreResult<bool> {
        let job_key = job_key.storage_key();
        let month = AccountUsageRecord::storage_key(charge.year, charge.month);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut job: JobRecord = read(&tx, JOBS, &job_key)?.ok_or_else(|| CoreError::not_found(JOBS, &job_key))?;
        if job.usage_reconciled {
            return Ok(false);
        }
        let mut profile: ProfileRecord =
            read(&tx, PROFILES, profile_id)?.ok_or_else(|| CoreError::not_found(PROFILES, profile_id))?;

        if let Some(mut account) = read::<AccountUsageRecord>(&tx, ACCOUNT_USAGE, &month)? {
            charge.apply_to_account(&mut account);
            write(&tx, ACCOUNT_USAGE, &month, &account)?;
        }
        charge.apply_to_profile(&mut profile);
        write(&tx, PROFILES, profile_id, &profile)?;
        job.usage_reconciled = true;
        write(&tx, JOBS, &job_key, &job)?;
        tx.commit()?;
        debug!(job_key, profile_id, "Reconciled usage");
        Ok(true)
    }

    async fn get_leaderboard(&self, leaderboard_id: &str) -> CoreResult<LeaderboardRecord> {
        self.load(LEADERBOARDS, leaderboard_id)
    }

    async fn put_leaderboard(&self, leaderboard: LeaderboardRecord) -> CoreResult<()> {
        self.store(LEADERBOARDS, &leaderboard.leaderboard_id, &leaderboard)
    }

    async fn increment_participant_count(&self, leaderboard_id: &str) -> CoreResult<u32> {
        let (_, count) = self.modify(LEADERBOARDS, leaderboard_id, |leaderboard: &mut LeaderboardRecord| {
            leaderboard.participant_count += 1;
            leaderboard.participant_count
        })?;
        Ok(count)
    }

    async fn get_ranking(&self, leaderboard_id: &str, profile_id: &str) -> CoreResult<Option<RankingRecord>> {
        self.find(RANKINGS, &RankingRecord::storage_key(leaderboard_id, profile_id))
    }

    async fn put_ranking(&self, ranking: RankingRecord) -> CoreResult<()> {
        let key = RankingRecord::storage_key(&ranking.leaderboard_id, &ranking.profile_id);
        self.store(RANKINGS, &key, &ranking)
    }

    async fn get_account_usage(&self, year: i32, month: u32) -> CoreResult<Option<AccountUsageRecord>> {
        self.find(ACCOUNT_USAGE, &AccountUsageRecord::storage_key(year, month))
    }

    async fn put_account_usage(&self, usage: AccountUsageRecord) -> CoreResult<()> {
        let key = AccountUsageRecord::storage_key(usage.year, usage.month);
        self.store(ACCOUNT_USAGE, &key, &usage)
    }
}
