use serde::{Deserialize, Serialize};

/// Per-trial result written by the simulation into the metrics file.
///
/// Field names follow the on-disk format (`snake_case`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetric {
    pub trial: u32,
    pub completion_percentage: f64,
    pub crash_count: u32,
    pub elapsed_time_in_milliseconds: u64,
    pub episode_status: String,
    pub off_track_count: u32,
    pub reset_count: u32,
}

impl EvaluationMetric {
    #[must_use]
    pub fn is_completed_lap(&self) -> bool {
        (self.completion_percentage - 100.0).abs() < f64::EPSILON
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStats {
    pub reset_count: u32,
    /// Best average over `minimumLaps` consecutive completed laps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_lap_time: Option<u64>,
    pub avg_resets: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_lap_time: Option<u64>,
    pub collision_count: u32,
    /// Longest run of consecutive completed laps.
    pub completed_lap_count: u32,
    pub off_track_count: u32,
    pub total_lap_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimingMethod {
    AvgLapTime,
    BestLapTime,
    TotalTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRecord {
    pub leaderboard_id: String,
    pub name: String,
    pub track_id: String,
    pub timing_method: TimingMethod,
    pub minimum_laps: u32,
    #[serde(default)]
    pub participant_count: u32,
}

/// A profile's best submission on one leaderboard. Lower scores rank higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRecord {
    pub leaderboard_id: String,
    pub profile_id: String,
    pub model_id: String,
    pub model_name: String,
    pub ranking_score: u64,
    pub stats: SubmissionStats,
    pub submission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_video_location: Option<String>,
    pub user_alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
}

impl RankingRecord {
    #[must_use]
    pub fn storage_key(leaderboard_id: &str, profile_id: &str) -> String {
        format!("{leaderboard_id}#{profile_id}")
    }
}
