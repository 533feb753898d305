//! Suppression and posture scoring working together: suppressed findings
//! drop out of the score, expiry is swept by the next sync, and the trend
//! term follows the recorded snapshots.

use chrono::{Duration, Utc};
use posture_engine::config::SyncConfig;
use posture_engine::models::{
    RawFinding, RiskLevel, ScanBatch, ScopeKey, Severity, TrendDirection,
};
use posture_engine::scoring::PostureScorer;
use posture_engine::state::{FindingStore, InMemoryStore};
use posture_engine::suppression::SuppressionManager;
use posture_engine::sync::DeltaSyncEngine;
use std::sync::Arc;
use uuid::Uuid;

fn raw(scan_type: &str, title: &str, arn: &str, severity: Severity) -> RawFinding {
    RawFinding {
        resource_arn: Some(arn.to_string()),
        resource_id: None,
        scan_type: scan_type.to_string(),
        title: title.to_string(),
        severity,
        resource_metadata: Default::default(),
    }
}

struct Harness {
    engine: DeltaSyncEngine,
    suppression: SuppressionManager,
    scorer: PostureScorer,
    store: Arc<InMemoryStore>,
    scope: ScopeKey,
}

fn setup() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    Harness {
        engine: DeltaSyncEngine::new(store.clone(), store.clone(), SyncConfig::default()),
        suppression: SuppressionManager::new(store.clone()),
        scorer: PostureScorer::new(store.clone(), store.clone(), 38),
        store: store.clone(),
        scope: ScopeKey::new(Uuid::new_v4(), "123456789012"),
    }
}

#[tokio::test]
async fn test_empty_scope_scores_perfect() {
    let h = setup();

    let score = h.scorer.score(&h.scope).await.unwrap();
    assert_eq!(score.overall_score, 100.0);
    assert_eq!(score.risk_level, RiskLevel::Low);
    assert_eq!(score.findings.total, 0);
}

#[tokio::test]
async fn test_suppressing_a_finding_raises_the_score() {
    let h = setup();

    h.engine
        .sync_scan(
            &h.scope,
            &ScanBatch::new(vec![
                raw("iam", "root-access-keys", "arn:aws:iam::1:root", Severity::Critical),
                raw("s3", "public-bucket", "arn:aws:s3:::b1", Severity::High),
            ]),
        )
        .await
        .unwrap();

    let before = h.scorer.score(&h.scope).await.unwrap();
    assert_eq!(before.findings.critical, 1);

    let critical = h
        .store
        .load_scope(&h.scope)
        .await
        .unwrap()
        .into_iter()
        .find(|f| f.severity == Severity::Critical)
        .unwrap();

    h.suppression
        .suppress(&critical.id, "analyst@example.com", "accepted risk", None)
        .await
        .unwrap();

    let after = h.scorer.score(&h.scope).await.unwrap();
    assert!(after.overall_score > before.overall_score);
    assert_eq!(after.findings.critical, 0);
    assert_eq!(after.findings.suppressed, 1);

    // And unsuppressing brings it back
    h.suppression.unsuppress(&critical.id).await.unwrap();
    let restored = h.scorer.score(&h.scope).await.unwrap();
    assert_eq!(restored.overall_score, before.overall_score);
}

#[tokio::test]
async fn test_expired_suppression_swept_by_next_sync() {
    let h = setup();
    let finding = raw("s3", "public-bucket", "arn:aws:s3:::b1", Severity::High);

    h.engine
        .sync_scan(&h.scope, &ScanBatch::new(vec![finding.clone()]))
        .await
        .unwrap();

    let stored = h.store.load_scope(&h.scope).await.unwrap();
    h.suppression
        .suppress(
            &stored[0].id,
            "analyst@example.com",
            "mitigation in flight",
            Some(Utc::now() - Duration::minutes(1)),
        )
        .await
        .unwrap();

    // The suppression is already past its expiry but nothing has swept it
    let stored = h.store.load_scope(&h.scope).await.unwrap();
    assert!(stored[0].suppression.is_some());

    h.engine
        .sync_scan(&h.scope, &ScanBatch::new(vec![finding]))
        .await
        .unwrap();

    let stored = h.store.load_scope(&h.scope).await.unwrap();
    assert!(stored[0].suppression.is_none());

    let score = h.scorer.score(&h.scope).await.unwrap();
    assert_eq!(score.findings.high, 1);
    assert_eq!(score.findings.suppressed, 0);
}

#[tokio::test]
async fn test_suppression_survives_subsequent_scans() {
    let h = setup();
    let finding = raw("s3", "public-bucket", "arn:aws:s3:::b1", Severity::High);

    h.engine
        .sync_scan(&h.scope, &ScanBatch::new(vec![finding.clone()]))
        .await
        .unwrap();

    let stored = h.store.load_scope(&h.scope).await.unwrap();
    h.suppression
        .suppress(&stored[0].id, "analyst@example.com", "accepted risk", None)
        .await
        .unwrap();

    // Unexpired suppression rides through reconciliation untouched
    h.engine
        .sync_scan(&h.scope, &ScanBatch::new(vec![finding]))
        .await
        .unwrap();

    let stored = h.store.load_scope(&h.scope).await.unwrap();
    let suppression = stored[0].suppression.as_ref().unwrap();
    assert_eq!(suppression.suppressed_by, "analyst@example.com");
    assert_eq!(stored[0].occurrence_count, 2);
}

#[tokio::test]
async fn test_trend_follows_snapshots_across_syncs() {
    let h = setup();

    // First sync: no history yet, trend is stable by definition
    h.engine
        .sync_scan(
            &h.scope,
            &ScanBatch::new(vec![
                raw("s3", "public-bucket", "arn:aws:s3:::b1", Severity::High),
                raw("iam", "root-access-keys", "arn:aws:iam::1:root", Severity::Critical),
                raw("rds", "unencrypted-db", "arn:aws:rds:us-east-1:1:db:d1", Severity::Medium),
            ]),
        )
        .await
        .unwrap();

    // Second sync fixes two findings; the snapshot from sync 1 says 3
    h.engine
        .sync_scan(
            &h.scope,
            &ScanBatch::new(vec![raw(
                "s3",
                "public-bucket",
                "arn:aws:s3:::b1",
                Severity::High,
            )]),
        )
        .await
        .unwrap();

    let score = h.scorer.score(&h.scope).await.unwrap();
    assert_eq!(score.trend.direction, TrendDirection::Improving);
    assert_eq!(score.trend.previous_total, 3);
    assert_eq!(score.trend.current_total, 1);
    assert_eq!(score.trend.delta, -2);
    assert_eq!(score.breakdown.trend_adjustment, 2.0);
}

#[tokio::test]
async fn test_score_reflects_open_findings_only() {
    let h = setup();

    h.engine
        .sync_scan(
            &h.scope,
            &ScanBatch::new(vec![raw(
                "iam",
                "root-access-keys",
                "arn:aws:iam::1:root",
                Severity::Critical,
            )]),
        )
        .await
        .unwrap();

    let open = h.scorer.score(&h.scope).await.unwrap();
    assert_eq!(open.breakdown.base_score, 90.0);

    // Empty scan resolves the finding; score recovers
    h.engine
        .sync_scan(&h.scope, &ScanBatch::new(vec![]))
        .await
        .unwrap();

    let resolved = h.scorer.score(&h.scope).await.unwrap();
    assert_eq!(resolved.findings.total, 0);
    assert_eq!(resolved.breakdown.base_score, 100.0);
}
