use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub profile_id: String,
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Minutes reserved by jobs that have not been finalized yet.
    #[serde(default)]
    pub compute_minutes_queued: f64,
    #[serde(default)]
    pub compute_minutes_used: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_compute_minutes: Option<f64>,
}

impl ProfileRecord {
    #[must_use]
    pub fn new(profile_id: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            alias: alias.into(),
            avatar: None,
            compute_minutes_queued: 0.0,
            compute_minutes_used: 0.0,
            max_total_compute_minutes: None,
        }
    }
}

/// Account-wide compute usage for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUsageRecord {
    pub year: i32,
    pub month: u32,
    pub compute_minutes_queued: f64,
    pub compute_minutes_used: f64,
}

impl AccountUsageRecord {
    #[must_use]
    pub fn storage_key(year: i32, month: u32) -> String {
        format!("{year:04}-{month:02}")
    }
}

/// Settlement of one finished job against the monthly account counter and
/// the profile counter.
///
/// The reserved minutes are released from "queued" (floored at zero) and the
/// billed minutes are added to "used".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageCharge {
    pub year: i32,
    pub month: u32,
    pub minutes_queued: f64,
    pub minutes_billed: f64,
}

impl UsageCharge {
    pub fn apply_to_account(&self, account: &mut AccountUsageRecord) {
        account.compute_minutes_queued = (account.compute_minutes_queued - self.minutes_queued).max(0.0);
        account.compute_minutes_used += self.minutes_billed;
    }

    pub fn apply_to_profile(&self, profile: &mut ProfileRecord) {
        profile.compute_minutes_queued = (profile.compute_minutes_queued - self.minutes_queued).max(0.0);
        profile.compute_minutes_used += self.minutes_billed;
    }
}
