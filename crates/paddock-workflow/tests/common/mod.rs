//! Shared fakes and fixtures for workflow integration tests.
//!
//! Every collaborator is an in-process fake that records the calls made to
//! it, so tests can assert on side effects as well as on records.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use paddock_core::{
    AccountUsageRecord, ActionSpace, AgentAlgorithm, ArtifactLayout, ContinuousActionSpace, CoreError, CoreResult,
    EvaluationMetric, InMemoryRecordStore, JobKey, JobKind, JobName, JobRecord, JobUpdate, LeaderboardRecord,
    ModelMetadata, ModelRecord, ModelStatus, ModelUpdate, ProfileRecord, RankingRecord, RecordStore,
    TerminationConditions, TimingMethod, TrackConfig, UsageCharge,
};
use paddock_workflow::services::{
    ArtifactStore, BackendJobDescription, ComputeBackend, InMemoryArtifactStore, LogSource, TrainingJobRequest,
    VideoStreamService,
};
use paddock_workflow::{BackendJobStatus, RecordingOutcomeSink, ServiceError, Services, WorkflowContext};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BUCKET: &str = "paddock-test";
pub const PROFILE_ID: &str = "profile-1";
pub const MODEL_ID: &str = "model-1";
pub const LEADERBOARD_ID: &str = "lb-1";

#[derive(Debug, Default)]
struct BackendState {
    submitted: Vec<TrainingJobRequest>,
    stopped: Vec<String>,
    statuses: VecDeque<BackendJobStatus>,
    describe_calls: usize,
    submit_error: Option<ServiceError>,
    describe_error: Option<ServiceError>,
    no_capacity: bool,
    stall_next_submit: bool,
}

/// Compute backend replaying scripted statuses. The last scripted status
/// repeats; a stopped job always reports `Stopped`.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
    pub model_artifact_location: Option<String>,
    pub max_runtime_seconds: Option<u64>,
    pub training_time_seconds: Option<u64>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            model_artifact_location: Some(format!("s3://{BUCKET}/artifacts/model.tar.gz")),
            max_runtime_seconds: Some(3_600),
            training_time_seconds: Some(1_800),
        }
    }

    pub fn script(&self, statuses: &[BackendJobStatus]) {
        self.state.lock().unwrap().statuses = statuses.iter().copied().collect();
    }

    pub fn fail_submit(&self, err: ServiceError) {
        self.state.lock().unwrap().submit_error = Some(err);
    }

    pub fn fail_describe(&self, err: ServiceError) {
        self.state.lock().unwrap().describe_error = Some(err);
    }

    /// The next submission is accepted but the call hangs for an hour.
    pub fn stall_next_submit(&self) {
        self.state.lock().unwrap().stall_next_submit = true;
    }

    pub fn set_capacity(&self, available: bool) {
        self.state.lock().unwrap().no_capacity = !available;
    }

    pub fn submitted(&self) -> Vec<TrainingJobRequest> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.state.lock().unwrap().describe_calls
    }
}

#[async_trait]
impl ComputeBackend for FakeBackend {
    async fn submit_job(&self, request: &TrainingJobRequest) -> Result<String, ServiceError> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.submit_error.clone() {
                return Err(err);
            }
            state.submitted.push(request.clone());
            std::mem::take(&mut state.stall_next_submit)
        };
        if stall {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        Ok(format!("arn:paddock:backend:training-job/{}", request.job_name))
    }

    async fn describe_job(&self, job_name: &str) -> Result<BackendJobDescription, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.describe_calls += 1;
        if let Some(err) = state.describe_error.clone() {
            return Err(err);
        }
        let status = if state.stopped.iter().any(|name| name == job_name) {
            BackendJobStatus::Stopped
        } else if state.statuses.len() > 1 {
            state.statuses.pop_front().unwrap_or(BackendJobStatus::InProgress)
        } else {
            state.statuses.front().copied().unwrap_or(BackendJobStatus::InProgress)
        };
        Ok(BackendJobDescription {
            status,
            model_artifact_location: self.model_artifact_location.clone(),
            max_runtime_seconds: self.max_runtime_seconds,
            training_time_seconds: self.training_time_seconds,
        })
    }

    async fn stop_job(&self, job_name: &str) -> Result<(), ServiceError> {
        self.state.lock().unwrap().stopped.push(job_name.to_string());
        Ok(())
    }

    async fn has_capacity(&self) -> Result<bool, ServiceError> {
        Ok(!self.state.lock().unwrap().no_capacity)
    }
}

#[derive(Debug, Default)]
struct VideoState {
    created: Vec<(String, u32)>,
    deleted: Vec<String>,
    url_requests: usize,
    url_error: Option<ServiceError>,
    delete_error: Option<ServiceError>,
}

#[derive(Debug, Default)]
pub struct FakeVideo {
    state: Mutex<VideoState>,
}

impl FakeVideo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_urls(&self, err: ServiceError) {
        self.state.lock().unwrap().url_error = Some(err);
    }

    pub fn fail_delete(&self, err: ServiceError) {
        self.state.lock().unwrap().delete_error = Some(err);
    }

    pub fn created(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn url_requests(&self) -> usize {
        self.state.lock().unwrap().url_requests
    }
}

#[async_trait]
impl VideoStreamService for FakeVideo {
    async fn create_stream(&self, name: &str, retention_hours: u32) -> Result<String, ServiceError> {
        self.state.lock().unwrap().created.push((name.to_string(), retention_hours));
        Ok(format!("arn:paddock:video:stream/{name}"))
    }

    async fn viewing_url(&self, name: &str, _expires_in: Duration) -> Result<String, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.url_requests += 1;
        if let Some(err) = state.url_error.clone() {
            return Err(err);
        }
        Ok(format!("https://video.paddock.test/{name}?v={}", state.url_requests))
    }

    async fn delete_stream(&self, arn: &str) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.delete_error.clone() {
            return Err(err);
        }
        state.deleted.push(arn.to_string());
        Ok(())
    }
}

/// Log streams keyed by `(group, stream)`. Unknown streams are `NotFound`.
#[derive(Debug, Default)]
pub struct FakeLogSource {
    streams: Mutex<HashMap<(String, String), String>>,
}

impl FakeLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, group: &str, stream: &str, body: &str) {
        self.streams.lock().unwrap().insert((group.to_string(), stream.to_string()), body.to_string());
    }
}

#[async_trait]
impl LogSource for FakeLogSource {
    async fn read_stream(&self, log_group: &str, stream_name: &str) -> Result<String, ServiceError> {
        self.streams
            .lock()
            .unwrap()
            .get(&(log_group.to_string(), stream_name.to_string()))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("{log_group}/{stream_name}")))
    }
}

/// Record store that forwards to an in-memory store and can misbehave on
/// request.
pub struct FlakyRecordStore {
    inner: Arc<InMemoryRecordStore>,
    stall_next_reconcile: AtomicBool,
    fail_get_job: AtomicBool,
}

impl FlakyRecordStore {
    pub fn new(inner: Arc<InMemoryRecordStore>) -> Arc<Self> {
        Arc::new(Self { inner, stall_next_reconcile: AtomicBool::new(false), fail_get_job: AtomicBool::new(false) })
    }

    /// The next usage reconciliation is applied, then the call hangs for an hour.
    pub fn stall_next_reconcile(&self) {
        self.stall_next_reconcile.store(true, Ordering::SeqCst);
    }

    pub fn fail_get_job(&self, fail: bool) {
        self.fail_get_job.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyRecordStore {
    async fn get_job(&self, key: &JobKey) -> CoreResult<JobRecord> {
        if self.fail_get_job.load(Ordering::SeqCst) {
            return Err(CoreError::LockPoisoned);
        }
        self.inner.get_job(key).await
    }

    async fn put_job(&self, job: JobRecord) -> CoreResult<()> {
        self.inner.put_job(job).await
    }

    async fn update_job(&self, key: &JobKey, update: JobUpdate) -> CoreResult<JobRecord> {
        self.inner.update_job(key, update).await
    }

    async fn get_model(&self, profile_id: &str, model_id: &str) -> CoreResult<ModelRecord> {
        self.inner.get_model(profile_id, model_id).await
    }

    async fn put_model(&self, model: ModelRecord) -> CoreResult<()> {
        self.inner.put_model(model).await
    }

    async fn update_model(&self, profile_id: &str, model_id: &str, update: ModelUpdate) -> CoreResult<ModelRecord> {
        self.inner.update_model(profile_id, model_id, update).await
    }

    async fn get_profile(&self, profile_id: &str) -> CoreResult<ProfileRecord> {
        self.inner.get_profile(profile_id).await
    }

    async fn put_profile(&self, profile: ProfileRecord) -> CoreResult<()> {
        self.inner.put_profile(profile).await
    }

    async fn reconcile_usage(&self, job_key: &JobKey, profile_id: &str, charge: &UsageCharge) -> CoreResult<bool> {
        let applied = self.inner.reconcile_usage(job_key, profile_id, charge).await?;
        if self.stall_next_reconcile.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        Ok(applied)
    }

    async fn get_leaderboard(&self, leaderboard_id: &str) -> CoreResult<LeaderboardRecord> {
        self.inner.get_leaderboard(leaderboard_id).await
    }

    async fn put_leaderboard(&self, leaderboard: LeaderboardRecord) -> CoreResult<()> {
        self.inner.put_leaderboard(leaderboard).await
    }

    async fn increment_participant_count(&self, leaderboard_id: &str) -> CoreResult<u32> {
        self.inner.increment_participant_count(leaderboard_id).await
    }

    async fn get_ranking(&self, leaderboard_id: &str, profile_id: &str) -> CoreResult<Option<RankingRecord>> {
        self.inner.get_ranking(leaderboard_id, profile_id).await
    }

    async fn put_ranking(&self, ranking: RankingRecord) -> CoreResult<()> {
        self.inner.put_ranking(ranking).await
    }

    async fn get_account_usage(&self, year: i32, month: u32) -> CoreResult<Option<AccountUsageRecord>> {
        self.inner.get_account_usage(year, month).await
    }

    async fn put_account_usage(&self, usage: AccountUsageRecord) -> CoreResult<()> {
        self.inner.put_account_usage(usage).await
    }
}

/// All fakes wired together, with seeded records.
pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub backend: Arc<FakeBackend>,
    pub video: Arc<FakeVideo>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub logs: Arc<FakeLogSource>,
    pub outcomes: Arc<RecordingOutcomeSink>,
    pub layout: ArtifactLayout,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryRecordStore::new()),
            backend: Arc::new(FakeBackend::new()),
            video: Arc::new(FakeVideo::new()),
            artifacts: Arc::new(InMemoryArtifactStore::new()),
            logs: Arc::new(FakeLogSource::new()),
            outcomes: Arc::new(RecordingOutcomeSink::new()),
            layout: ArtifactLayout::new(BUCKET),
        }
    }

    pub fn services(&self) -> Services {
        self.services_with_store(self.store.clone())
    }

    /// Services whose record store is `store` instead of the seeded one.
    pub fn services_with_store(&self, store: Arc<dyn RecordStore>) -> Services {
        Services {
            store,
            backend: self.backend.clone(),
            video: self.video.clone(),
            artifacts: self.artifacts.clone(),
            logs: self.logs.clone(),
            outcomes: self.outcomes.clone(),
            layout: self.layout.clone(),
        }
    }

    /// Seeds profile, model, account usage, leaderboard and a queued job.
    pub async fn seed(&self, kind: JobKind, id: &str) -> (JobRecord, WorkflowContext) {
        let mut profile = ProfileRecord::new(PROFILE_ID, "fast-racer");
        profile.avatar = Some("avatar-1".to_string());
        profile.compute_minutes_queued = 120.0;
        profile.compute_minutes_used = 10.0;
        self.store.put_profile(profile).await.unwrap();
        self.store.put_model(model(&self.layout)).await.unwrap();

        let now = Utc::now();
        if self.store.get_account_usage(now.year(), now.month()).await.unwrap().is_none() {
            self.store
                .put_account_usage(AccountUsageRecord {
                    year: now.year(),
                    month: now.month(),
                    compute_minutes_queued: 500.0,
                    compute_minutes_used: 0.0,
                })
                .await
                .unwrap();
        }

        if self.store.get_leaderboard(LEADERBOARD_ID).await.is_err() {
            self.store.put_leaderboard(leaderboard(TimingMethod::BestLapTime, 1)).await.unwrap();
        }

        let job = job(&self.layout, kind, id);
        self.store.put_job(job.clone()).await.unwrap();
        let ctx = WorkflowContext::new(job.name.clone(), MODEL_ID, PROFILE_ID, job.leaderboard_id.clone());
        (job, ctx)
    }

    pub async fn job(&self, ctx: &WorkflowContext) -> JobRecord {
        self.store.get_job(&ctx.job_key().unwrap()).await.unwrap()
    }

    pub async fn model(&self) -> ModelRecord {
        self.store.get_model(PROFILE_ID, MODEL_ID).await.unwrap()
    }

    pub async fn profile(&self) -> ProfileRecord {
        self.store.get_profile(PROFILE_ID).await.unwrap()
    }

    pub async fn account_usage(&self) -> AccountUsageRecord {
        let now = Utc::now();
        self.store.get_account_usage(now.year(), now.month()).await.unwrap().unwrap()
    }

    pub async fn write_heartbeat(&self, job: &JobRecord, body: &str) {
        self.artifacts
            .put(&job.asset_locations.simulation_heartbeat, body.as_bytes().to_vec())
            .await
            .unwrap();
    }

    pub async fn put_artifact(&self, location: &str, body: &str) {
        self.artifacts.put(location, body.as_bytes().to_vec()).await.unwrap();
    }

    pub async fn write_metrics(&self, job: &JobRecord, metrics: &[EvaluationMetric]) {
        let body = serde_json::json!({ "metrics": metrics }).to_string();
        self.artifacts.put(&job.asset_locations.metrics, body.into_bytes()).await.unwrap();
    }
}

pub fn model(layout: &ArtifactLayout) -> ModelRecord {
    ModelRecord {
        model_id: MODEL_ID.to_string(),
        profile_id: PROFILE_ID.to_string(),
        name: "fast-model".to_string(),
        status: ModelStatus::Ready,
        metadata: ModelMetadata {
            agent_algorithm: AgentAlgorithm::Sac,
            action_space: ActionSpace::Continuous(ContinuousActionSpace {
                low_speed: 0.5,
                high_speed: 3.0,
                low_steering_angle: -30.0,
                high_steering_angle: 30.0,
            }),
            sensors: vec!["FRONT_FACING_CAMERA".to_string()],
            reward_function: "def reward_function(params):\n    return 1.0\n".to_string(),
        },
        asset_locations: layout.model_assets(PROFILE_ID, MODEL_ID),
    }
}

pub fn job(layout: &ArtifactLayout, kind: JobKind, id: &str) -> JobRecord {
    let name = JobName::new(kind, id).unwrap();
    let leaderboard_id = (kind == JobKind::Submission).then(|| LEADERBOARD_ID.to_string());
    let assets = layout.job_assets(PROFILE_ID, MODEL_ID, &name, Utc::now());
    JobRecord::queued(
        name,
        MODEL_ID,
        PROFILE_ID,
        leaderboard_id,
        "fast-model",
        TerminationConditions { max_time_in_minutes: 60, max_laps: Some(3) },
        assets,
        TrackConfig { track_id: "reinvent_base".to_string(), direction: None },
    )
}

pub fn leaderboard(timing_method: TimingMethod, minimum_laps: u32) -> LeaderboardRecord {
    LeaderboardRecord {
        leaderboard_id: LEADERBOARD_ID.to_string(),
        name: "Summit Speedway".to_string(),
        track_id: "reinvent_base".to_string(),
        timing_method,
        minimum_laps,
        participant_count: 0,
    }
}

pub fn lap(trial: u32, completion_percentage: f64, elapsed_ms: u64) -> EvaluationMetric {
    EvaluationMetric {
        trial,
        completion_percentage,
        crash_count: 0,
        elapsed_time_in_milliseconds: elapsed_ms,
        episode_status: if completion_percentage >= 100.0 { "Lap complete" } else { "Off track" }.to_string(),
        off_track_count: u32::from(completion_percentage < 100.0),
        reset_count: 0,
    }
}
