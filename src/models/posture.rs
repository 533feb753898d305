use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Full posture score response for one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostureScore {
    /// Final bounded score in [0, 100]
    pub overall_score: f64,

    /// Risk band derived from the final score
    pub risk_level: RiskLevel,

    /// Non-suppressed open finding counts by severity
    pub findings: FindingCounts,

    /// Fraction of scannable services covered by observed scan types, [0, 1]
    pub service_coverage: f64,

    /// Direction of change versus the previous scan
    pub trend: Trend,

    /// Individual score components before clamping
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
    pub suppressed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub previous_total: usize,
    pub current_total: usize,
    pub delta: i64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base_score: f64,
    pub time_exposure_penalty: f64,
    pub service_coverage_bonus: f64,
    pub trend_adjustment: f64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a final score to its risk band
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskLevel::Low
        } else if score >= 60.0 {
            RiskLevel::Medium
        } else if score >= 40.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Per-scope severity counts recorded after each successful sync, consumed
/// by the trend term of the next score computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub recorded_at: DateTime<Utc>,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
}
