//! Evaluation metrics, submission statistics and ranking scores.

use crate::error::{WorkflowError, WorkflowResult};
use crate::services::ArtifactStore;
use paddock_core::{EvaluationMetric, SubmissionStats, TimingMethod};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Metrics file written by the simulation at the job's metrics location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsFile {
    #[serde(default)]
    pub metrics: Vec<EvaluationMetric>,
}

/// Reads the metrics file. A missing file yields no metrics.
pub async fn load_metrics(artifacts: &dyn ArtifactStore, location: &str) -> WorkflowResult<Vec<EvaluationMetric>> {
    let Some(body) = artifacts.get_string(location).await.map_err(WorkflowError::Artifacts)? else {
        warn!(location, "Evaluation metrics file does not exist");
        return Ok(Vec::new());
    };
    let file: MetricsFile = serde_json::from_str(&body)?;
    if file.metrics.is_empty() {
        warn!(location, "Evaluation metrics file metrics are empty");
    }
    Ok(file.metrics)
}

#[must_use]
pub fn submission_stats(metrics: &[EvaluationMetric], minimum_laps: u32) -> SubmissionStats {
    let reset_count: u32 = metrics.iter().map(|m| m.reset_count).sum();
    SubmissionStats {
        reset_count,
        avg_lap_time: best_average_lap_time(metrics, minimum_laps as usize),
        avg_resets: if metrics.is_empty() { 0.0 } else { f64::from(reset_count) / metrics.len() as f64 },
        best_lap_time: metrics.iter().map(|m| m.elapsed_time_in_milliseconds).min(),
        collision_count: metrics.iter().map(|m| m.crash_count).sum(),
        completed_lap_count: max_consecutive_completed_laps(metrics),
        off_track_count: metrics.iter().map(|m| m.off_track_count).sum(),
        total_lap_time: metrics.iter().map(|m| m.elapsed_time_in_milliseconds).sum(),
    }
}

/// Score used to rank a submission; lower is better. `None` when the
/// statistics carry no value for the timing method.
#[must_use]
pub fn ranking_score(stats: &SubmissionStats, method: TimingMethod) -> Option<u64> {
    match method {
        TimingMethod::AvgLapTime => stats.avg_lap_time,
        TimingMethod::BestLapTime => stats.best_lap_time,
        TimingMethod::TotalTime => Some(stats.total_lap_time),
    }
}

/// Lowest mean lap time over any `window` consecutive completed laps.
#[must_use]
pub fn best_average_lap_time(metrics: &[EvaluationMetric], window: usize) -> Option<u64> {
    if window == 0 || window > metrics.len() {
        return None;
    }
    metrics
        .windows(window)
        .filter(|laps| laps.iter().all(EvaluationMetric::is_completed_lap))
        .map(|laps| laps.iter().map(|m| m.elapsed_time_in_milliseconds).sum::<u64>() / window as u64)
        .min()
}

#[must_use]
pub fn max_consecutive_completed_laps(metrics: &[EvaluationMetric]) -> u32 {
    let mut best = 0;
    let mut streak = 0;
    for metric in metrics {
        if metric.is_completed_lap() {
            streak += 1;
            best = best.max(streak);
        } else {
            streak = 0;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryArtifactStore;

    fn lap(completion: f64, millis: u64) -> EvaluationMetric {
        EvaluationMetric {
            trial: 0,
            completion_percentage: completion,
            crash_count: 1,
            elapsed_time_in_milliseconds: millis,
            episode_status: if completion >= 100.0 { "Lap complete" } else { "Off track" }.to_string(),
            off_track_count: 2,
            reset_count: 3,
        }
    }

    #[test]
    fn test_consecutive_laps_reset_on_incomplete_lap() {
        let metrics = [lap(100.0, 10), lap(100.0, 10), lap(40.0, 5), lap(100.0, 10)];
        assert_eq!(max_consecutive_completed_laps(&metrics), 2);
        assert_eq!(max_consecutive_completed_laps(&[]), 0);
    }

    #[test]
    fn test_best_average_skips_windows_with_incomplete_laps() {
        let metrics = [lap(100.0, 12_000), lap(100.0, 10_000), lap(50.0, 3_000), lap(100.0, 9_000)];
        assert_eq!(best_average_lap_time(&metrics, 2), Some(11_000));
        assert_eq!(best_average_lap_time(&metrics, 1), Some(9_000));
        assert_eq!(best_average_lap_time(&metrics, 3), None);
        assert_eq!(best_average_lap_time(&metrics, 5), None);
        assert_eq!(best_average_lap_time(&metrics, 0), None);
    }

    #[test]
    fn test_submission_stats_totals() {
        let metrics = [lap(100.0, 12_000), lap(100.0, 10_001), lap(20.0, 2_000)];
        let stats = submission_stats(&metrics, 2);

        assert_eq!(stats.reset_count, 9);
        assert_eq!(stats.avg_resets, 3.0);
        assert_eq!(stats.collision_count, 3);
        assert_eq!(stats.off_track_count, 6);
        assert_eq!(stats.completed_lap_count, 2);
        assert_eq!(stats.total_lap_time, 24_001);
        assert_eq!(stats.best_lap_time, Some(2_000));
        assert_eq!(stats.avg_lap_time, Some(11_000));

        assert_eq!(ranking_score(&stats, TimingMethod::AvgLapTime), Some(11_000));
        assert_eq!(ranking_score(&stats, TimingMethod::BestLapTime), Some(2_000));
        assert_eq!(ranking_score(&stats, TimingMethod::TotalTime), Some(24_001));
    }

    #[test]
    fn test_empty_metrics_have_no_lap_scores() {
        let stats = submission_stats(&[], 1);
        assert_eq!(stats.avg_resets, 0.0);
        assert_eq!(ranking_score(&stats, TimingMethod::AvgLapTime), None);
        assert_eq!(ranking_score(&stats, TimingMethod::BestLapTime), None);
    }

    #[tokio::test]
    async fn test_load_metrics_tolerates_missing_file() {
        let store = InMemoryArtifactStore::new();
        assert!(load_metrics(&store, "s3://b/metrics.json").await.unwrap().is_empty());

        store
            .put(
                "s3://b/metrics.json",
                br#"{"metrics":[{"trial":1,"completion_percentage":100,"crash_count":0,
                    "elapsed_time_in_milliseconds":9876,"episode_status":"Lap complete",
                    "off_track_count":0,"reset_count":0}]}"#
                    .to_vec(),
            )
            .await
            .unwrap();
        let metrics = load_metrics(&store, "s3://b/metrics.json").await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].elapsed_time_in_milliseconds, 9876);

        store.put("s3://b/metrics.json", b"not json".to_vec()).await.unwrap();
        assert!(matches!(load_metrics(&store, "s3://b/metrics.json").await, Err(WorkflowError::Json(_))));
    }
}
