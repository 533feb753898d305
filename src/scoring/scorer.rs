//! Posture score computation.
//!
//! The score is a pure function over the open findings of a scope, the
//! previous scan's severity counts, and the service-coverage denominator.
//! Suppressed findings are excluded from every term, so suppressing a
//! finding can never lower the score, and the result is always in [0, 100].

use crate::error::Result;
use crate::models::{
    Finding, FindingCounts, PostureScore, RiskLevel, ScopeKey, ScoreBreakdown, Severity,
    SnapshotCounts, Trend, TrendDirection,
};
use crate::state::{FindingStore, SnapshotStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Age beyond which a finding starts accruing exposure penalty, per tier
const CRITICAL_AGE_DAYS: i64 = 7;
const HIGH_AGE_DAYS: i64 = 14;
const MEDIUM_AGE_DAYS: i64 = 30;

/// Per-finding exposure penalties and per-tier caps
const CRITICAL_PENALTY: f64 = 2.0;
const HIGH_PENALTY: f64 = 1.0;
const MEDIUM_PENALTY: f64 = 0.5;
const CRITICAL_PENALTY_CAP: f64 = 20.0;
const HIGH_PENALTY_CAP: f64 = 10.0;
const MEDIUM_PENALTY_CAP: f64 = 5.0;

const COVERAGE_BONUS_MAX: f64 = 10.0;
const TREND_ADJUSTMENT_CAP: f64 = 5.0;

/// Read-side service: loads a consistent snapshot of the scope and the
/// previous trend counts, then delegates to the pure `compute`.
pub struct PostureScorer {
    store: Arc<dyn FindingStore>,
    snapshots: Arc<dyn SnapshotStore>,
    total_scannable_services: usize,
}

impl PostureScorer {
    pub fn new(
        store: Arc<dyn FindingStore>,
        snapshots: Arc<dyn SnapshotStore>,
        total_scannable_services: usize,
    ) -> Self {
        Self {
            store,
            snapshots,
            total_scannable_services,
        }
    }

    pub async fn score(&self, scope: &ScopeKey) -> Result<PostureScore> {
        // The rows and the trend baseline come from two reads; a sync
        // landing between them changes the baseline. Re-read until the
        // baseline is stable around the row load so the pair is
        // consistent, then compute in one pass.
        let mut baseline = self.snapshots.previous_snapshot(scope).await?;
        let mut findings = self.store.load_scope(scope).await?;
        for _ in 0..2 {
            let check = self.snapshots.previous_snapshot(scope).await?;
            if check == baseline {
                break;
            }
            baseline = check;
            findings = self.store.load_scope(scope).await?;
        }

        Ok(compute(
            &findings,
            baseline.as_ref(),
            self.total_scannable_services,
            Utc::now(),
        ))
    }
}

/// Compute the posture score from a scope's findings.
///
/// "Current findings" means open (new/active/reopened) rows; resolved
/// findings no longer count against the score. The trend baseline is the
/// snapshot recorded by the scan before the most recent one, so the trend
/// reflects change between consecutive scans.
pub fn compute(
    findings: &[Finding],
    previous: Option<&SnapshotCounts>,
    total_scannable_services: usize,
    now: DateTime<Utc>,
) -> PostureScore {
    let open: Vec<&Finding> = findings.iter().filter(|f| f.is_open()).collect();
    let scorable: Vec<&Finding> = open
        .iter()
        .copied()
        .filter(|f| !f.is_suppressed())
        .collect();

    let counts = finding_counts(&open, &scorable);
    let base_score = base_score(&scorable);
    let time_exposure_penalty = time_exposure_penalty(&scorable, now);
    let (service_coverage, service_coverage_bonus) =
        service_coverage(&scorable, total_scannable_services);
    let (trend, trend_adjustment) = trend(counts.total, previous);

    let overall_score =
        (base_score - time_exposure_penalty + service_coverage_bonus + trend_adjustment)
            .clamp(0.0, 100.0);

    PostureScore {
        overall_score,
        risk_level: RiskLevel::from_score(overall_score),
        findings: counts,
        service_coverage,
        trend,
        breakdown: ScoreBreakdown {
            base_score,
            time_exposure_penalty,
            service_coverage_bonus,
            trend_adjustment,
        },
    }
}

fn finding_counts(open: &[&Finding], scorable: &[&Finding]) -> FindingCounts {
    let count = |severity: Severity| {
        scorable
            .iter()
            .filter(|finding| finding.severity == severity)
            .count()
    };

    FindingCounts {
        critical: count(Severity::Critical),
        high: count(Severity::High),
        medium: count(Severity::Medium),
        low: count(Severity::Low),
        total: scorable.len(),
        suppressed: open.len() - scorable.len(),
    }
}

fn base_score(scorable: &[&Finding]) -> f64 {
    let deduction: f64 = scorable
        .iter()
        .map(|finding| finding.severity.score_weight())
        .sum();
    100.0 - deduction.min(100.0)
}

/// Exposure penalty grows with how long findings have sat unaddressed.
/// Monotonically non-decreasing in age: aging a qualifying finding can
/// only keep or raise the penalty, never lower it.
fn time_exposure_penalty(scorable: &[&Finding], now: DateTime<Utc>) -> f64 {
    let tier = |severity: Severity, age_days: i64, per_finding: f64, cap: f64| {
        let threshold = Duration::days(age_days);
        let over_threshold = scorable
            .iter()
            .filter(|finding| finding.severity == severity && finding.age(now) > threshold)
            .count();
        (over_threshold as f64 * per_finding).min(cap)
    };

    tier(Severity::Critical, CRITICAL_AGE_DAYS, CRITICAL_PENALTY, CRITICAL_PENALTY_CAP)
        + tier(Severity::High, HIGH_AGE_DAYS, HIGH_PENALTY, HIGH_PENALTY_CAP)
        + tier(Severity::Medium, MEDIUM_AGE_DAYS, MEDIUM_PENALTY, MEDIUM_PENALTY_CAP)
}

fn service_coverage(scorable: &[&Finding], total_scannable_services: usize) -> (f64, f64) {
    if total_scannable_services == 0 {
        return (0.0, 0.0);
    }

    let scanned: HashSet<&str> = scorable
        .iter()
        .map(|finding| finding.scan_type.as_str())
        .collect();

    let ratio = (scanned.len() as f64 / total_scannable_services as f64).min(1.0);
    (ratio, ratio * COVERAGE_BONUS_MAX)
}

fn trend(current_total: usize, previous: Option<&SnapshotCounts>) -> (Trend, f64) {
    let Some(previous) = previous else {
        // No history yet: neutral by definition
        return (
            Trend {
                direction: TrendDirection::Stable,
                previous_total: 0,
                current_total,
                delta: current_total as i64,
            },
            0.0,
        );
    };

    let previous_total = previous.total;
    let delta = current_total as i64 - previous_total as i64;

    let direction = match delta {
        d if d < 0 => TrendDirection::Improving,
        0 => TrendDirection::Stable,
        _ => TrendDirection::Degrading,
    };

    // Sign matches direction, magnitude capped
    let adjustment = (-(delta as f64)).clamp(-TREND_ADJUSTMENT_CAP, TREND_ADJUSTMENT_CAP);

    (
        Trend {
            direction,
            previous_total,
            current_total,
            delta,
        },
        adjustment,
    )
}
