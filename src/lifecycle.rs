//! Finding lifecycle state machine.
//!
//! Four states, no terminal state: any finding can transition again on the
//! next scan. The transition function is pure; timestamp and counter side
//! effects live in `mark_present` / `mark_absent` so the delta sync engine
//! applies them uniformly.

use crate::models::{Finding, FindingStatus};
use chrono::{DateTime, Utc};

/// Next status given presence or absence in the current scan.
///
/// | current  | present again | not present |
/// |----------|---------------|-------------|
/// | new      | active        | resolved    |
/// | active   | active        | resolved    |
/// | resolved | reopened      | resolved    |
/// | reopened | active        | resolved    |
pub fn next_status(current: FindingStatus, present_in_scan: bool) -> FindingStatus {
    match (current, present_in_scan) {
        (FindingStatus::Resolved, true) => FindingStatus::Reopened,
        (_, true) => FindingStatus::Active,
        (_, false) => FindingStatus::Resolved,
    }
}

/// Apply a "seen again" transition: status per the table, `last_seen`
/// updated, `occurrence_count` incremented by exactly 1, `resolved_at`
/// cleared when leaving Resolved. `first_seen` is never touched.
pub fn mark_present(finding: &mut Finding, now: DateTime<Utc>) {
    let next = next_status(finding.status, true);
    if finding.status == FindingStatus::Resolved {
        finding.resolved_at = None;
    }
    finding.status = next;
    finding.last_seen = now;
    finding.occurrence_count += 1;
}

/// Apply a "not seen" transition: open findings resolve with `resolved_at`
/// set; already-resolved findings are untouched.
pub fn mark_absent(finding: &mut Finding, now: DateTime<Utc>) {
    if finding.status == FindingStatus::Resolved {
        return;
    }
    finding.status = FindingStatus::Resolved;
    finding.resolved_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScopeKey, Severity};
    use chrono::Duration;
    use uuid::Uuid;

    fn finding(now: DateTime<Utc>) -> Finding {
        Finding::new(
            &ScopeKey::new(Uuid::new_v4(), "123456789012"),
            "f".repeat(64),
            "arn:aws:s3:::b1".to_string(),
            "s3".to_string(),
            "public-bucket".to_string(),
            Severity::High,
            Default::default(),
            now,
        )
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(next_status(FindingStatus::New, true), FindingStatus::Active);
        assert_eq!(next_status(FindingStatus::New, false), FindingStatus::Resolved);
        assert_eq!(next_status(FindingStatus::Active, true), FindingStatus::Active);
        assert_eq!(next_status(FindingStatus::Active, false), FindingStatus::Resolved);
        assert_eq!(next_status(FindingStatus::Resolved, true), FindingStatus::Reopened);
        assert_eq!(next_status(FindingStatus::Resolved, false), FindingStatus::Resolved);
        assert_eq!(next_status(FindingStatus::Reopened, true), FindingStatus::Active);
        assert_eq!(next_status(FindingStatus::Reopened, false), FindingStatus::Resolved);
    }

    #[test]
    fn test_mark_present_updates_counters() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(6);
        let mut f = finding(t0);

        mark_present(&mut f, t1);

        assert_eq!(f.status, FindingStatus::Active);
        assert_eq!(f.occurrence_count, 2);
        assert_eq!(f.first_seen, t0);
        assert_eq!(f.last_seen, t1);
    }

    #[test]
    fn test_mark_absent_resolves() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(6);
        let mut f = finding(t0);

        mark_absent(&mut f, t1);

        assert_eq!(f.status, FindingStatus::Resolved);
        assert_eq!(f.resolved_at, Some(t1));
        // Resolution does not count as an occurrence
        assert_eq!(f.occurrence_count, 1);
    }

    #[test]
    fn test_mark_absent_idempotent_on_resolved() {
        let t0 = Utc::now();
        let mut f = finding(t0);
        mark_absent(&mut f, t0 + Duration::hours(1));
        let resolved_at = f.resolved_at;

        mark_absent(&mut f, t0 + Duration::hours(2));

        assert_eq!(f.resolved_at, resolved_at);
        assert_eq!(f.status, FindingStatus::Resolved);
    }

    #[test]
    fn test_reopen_cycle() {
        let t0 = Utc::now();
        let mut f = finding(t0);

        // Scan 2: seen again
        mark_present(&mut f, t0 + Duration::days(1));
        assert_eq!(f.status, FindingStatus::Active);

        // Scan 3: absent
        mark_absent(&mut f, t0 + Duration::days(2));
        assert_eq!(f.status, FindingStatus::Resolved);
        assert!(f.resolved_at.is_some());

        // Scan 4: reappears
        mark_present(&mut f, t0 + Duration::days(3));
        assert_eq!(f.status, FindingStatus::Reopened);
        assert!(f.resolved_at.is_none());
        assert_eq!(f.occurrence_count, 3);

        // Scan 5: still present
        mark_present(&mut f, t0 + Duration::days(4));
        assert_eq!(f.status, FindingStatus::Active);
        assert_eq!(f.occurrence_count, 4);
    }

    #[test]
    fn test_first_seen_immutable() {
        let t0 = Utc::now();
        let mut f = finding(t0);
        for day in 1..=10 {
            mark_present(&mut f, t0 + Duration::days(day));
        }
        assert_eq!(f.first_seen, t0);
        assert_eq!(f.occurrence_count, 11);
    }
}
