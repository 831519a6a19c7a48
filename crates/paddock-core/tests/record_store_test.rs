//! Behaviour shared by every `RecordStore` implementation.

use paddock_core::{
    AccountUsageRecord, ActionSpace, AgentAlgorithm, ArtifactLayout, CoreError, DiscreteAction, InMemoryRecordStore,
    JobKind, JobName, JobRecord, JobStatus, JobUpdate, LeaderboardRecord, ModelMetadata, ModelRecord, ModelStatus,
    ModelUpdate, ProfileRecord, RankingRecord, RecordStore, SqliteRecordStore, SubmissionStats, TerminationConditions,
    TimingMethod, TrackConfig, UsageCharge,
};
use chrono::Utc;
use pretty_assertions::assert_eq;

fn submission_job() -> JobRecord {
    let name = JobName::new(JobKind::Submission, "s-1").unwrap();
    let assets = ArtifactLayout::new("bucket").job_assets("p-1", "m-1", &name, Utc::now());
    JobRecord::queued(
        name,
        "m-1",
        "p-1",
        Some("lb-1".to_string()),
        "fast-model",
        TerminationConditions { max_time_in_minutes: 20, max_laps: Some(3) },
        assets,
        TrackConfig { track_id: "reinvent_base".to_string(), direction: None },
    )
}

fn model() -> ModelRecord {
    ModelRecord {
        model_id: "m-1".to_string(),
        profile_id: "p-1".to_string(),
        name: "fast-model".to_string(),
        status: ModelStatus::Ready,
        metadata: ModelMetadata {
            agent_algorithm: AgentAlgorithm::Ppo,
            action_space: ActionSpace::Discrete(vec![DiscreteAction { speed: 1.0, steering_angle: 0.0 }]),
            sensors: vec!["FRONT_FACING_CAMERA".to_string()],
            reward_function: "def reward_function(params):\n    return 1.0\n".to_string(),
        },
        asset_locations: ArtifactLayout::new("bucket").model_assets("p-1", "m-1"),
    }
}

async fn exercise_jobs(store: &dyn RecordStore) {
    let job = submission_job();
    let key = job.key().unwrap();
    store.put_job(job.clone()).await.unwrap();

    assert_eq!(store.get_job(&key).await.unwrap(), job);

    let updated = store
        .update_job(&key, JobUpdate::status(JobStatus::Canceled))
        .await
        .unwrap();
    assert_eq!(updated.status, JobStatus::Canceled);

    let updated = store
        .update_job(
            &key,
            JobUpdate::status(JobStatus::Completed).with_video_stream_url(Some("https://video".to_string())),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, JobStatus::Canceled);
    assert_eq!(updated.video_stream_url.as_deref(), Some("https://video"));
    assert_eq!(store.get_job(&key).await.unwrap(), updated);
}

async fn exercise_missing_records(store: &dyn RecordStore) {
    let key = submission_job().key().unwrap();
    let err = store.get_job(&key).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        store.update_job(&key, JobUpdate::status(JobStatus::Failed)).await,
        Err(CoreError::NotFound { entity: "job", .. })
    ));
    assert!(store.get_ranking("lb-1", "p-1").await.unwrap().is_none());
    assert!(store.get_account_usage(2024, 1).await.unwrap().is_none());
}

async fn exercise_model_and_profile(store: &dyn RecordStore) {
    store.put_model(model()).await.unwrap();
    let updated = store
        .update_model(
            "p-1",
            "m-1",
            ModelUpdate { status: Some(ModelStatus::Ready), model_artifact_location: Some("s3://a/b.tar.gz".into()) },
        )
        .await
        .unwrap();
    assert_eq!(updated.asset_locations.model_artifact.as_deref(), Some("s3://a/b.tar.gz"));

    let mut profile = ProfileRecord::new("p-1", "racer");
    profile.avatar = Some("avatar-7".to_string());
    store.put_profile(profile.clone()).await.unwrap();
    assert_eq!(store.get_profile("p-1").await.unwrap(), profile);
}

async fn exercise_usage_reconciliation(store: &dyn RecordStore) {
    let job = submission_job();
    let key = job.key().unwrap();
    store.put_job(job).await.unwrap();
    let mut profile = ProfileRecord::new("p-1", "racer");
    profile.compute_minutes_queued = 100.0;
    profile.compute_minutes_used = 5.0;
    store.put_profile(profile).await.unwrap();
    store
        .put_account_usage(AccountUsageRecord { year: 2024, month: 4, compute_minutes_queued: 300.0, compute_minutes_used: 0.0 })
        .await
        .unwrap();
    let charge = UsageCharge { year: 2024, month: 4, minutes_queued: 60.0, minutes_billed: 30.0 };

    // An unknown profile aborts the whole charge.
    let err = store.reconcile_usage(&key, "ghost", &charge).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!store.get_job(&key).await.unwrap().usage_reconciled);
    assert_eq!(store.get_account_usage(2024, 4).await.unwrap().unwrap().compute_minutes_queued, 300.0);

    assert!(store.reconcile_usage(&key, "p-1", &charge).await.unwrap());
    assert!(!store.reconcile_usage(&key, "p-1", &charge).await.unwrap());

    assert!(store.get_job(&key).await.unwrap().usage_reconciled);
    let profile = store.get_profile("p-1").await.unwrap();
    assert_eq!((profile.compute_minutes_queued, profile.compute_minutes_used), (40.0, 35.0));
    let account = store.get_account_usage(2024, 4).await.unwrap().unwrap();
    assert_eq!((account.compute_minutes_queued, account.compute_minutes_used), (240.0, 30.0));
}

async fn exercise_leaderboard(store: &dyn RecordStore) {
    store
        .put_leaderboard(LeaderboardRecord {
            leaderboard_id: "lb-1".to_string(),
            name: "spring cup".to_string(),
            track_id: "reinvent_base".to_string(),
            timing_method: TimingMethod::BestLapTime,
            minimum_laps: 1,
            participant_count: 4,
        })
        .await
        .unwrap();
    assert_eq!(store.increment_participant_count("lb-1").await.unwrap(), 5);
    assert_eq!(store.get_leaderboard("lb-1").await.unwrap().participant_count, 5);

    let ranking = RankingRecord {
        leaderboard_id: "lb-1".to_string(),
        profile_id: "p-1".to_string(),
        model_id: "m-1".to_string(),
        model_name: "fast-model".to_string(),
        ranking_score: 9_000,
        stats: SubmissionStats::default(),
        submission_id: "s-1".to_string(),
        submission_number: Some(1),
        submission_video_location: None,
        user_alias: "racer".to_string(),
        user_avatar: None,
    };
    store.put_ranking(ranking.clone()).await.unwrap();
    assert_eq!(store.get_ranking("lb-1", "p-1").await.unwrap(), Some(ranking));

    let usage = AccountUsageRecord { year: 2024, month: 3, compute_minutes_queued: 60.0, compute_minutes_used: 0.0 };
    store.put_account_usage(usage.clone()).await.unwrap();
    assert_eq!(store.get_account_usage(2024, 3).await.unwrap(), Some(usage));
}

#[tokio::test]
async fn test_in_memory_store() {
    let store = InMemoryRecordStore::new();
    exercise_missing_records(&store).await;
    exercise_jobs(&store).await;
    exercise_model_and_profile(&store).await;
    exercise_leaderboard(&store).await;
    exercise_usage_reconciliation(&store).await;
}

#[tokio::test]
async fn test_sqlite_store() {
    let store = SqliteRecordStore::open_in_memory().unwrap();
    exercise_missing_records(&store).await;
    exercise_jobs(&store).await;
    exercise_model_and_profile(&store).await;
    exercise_leaderboard(&store).await;
    exercise_usage_reconciliation(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.db");
    let job = submission_job();
    let key = job.key().unwrap();

    {
        let store = SqliteRecordStore::open(&path).unwrap();
        store.put_job(job).await.unwrap();
        store
            .update_job(&key, JobUpdate::status(JobStatus::InProgress))
            .await
            .unwrap();
    }

    let store = SqliteRecordStore::open(&path).unwrap();
    assert_eq!(store.get_job(&key).await.unwrap().status, JobStatus::InProgress);
}
