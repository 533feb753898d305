use crate::config::SyncConfig;
use crate::error::{AppError, Result};
use crate::models::{
    Finding, RawFinding, ScanBatch, ScopeKey, SnapshotCounts, Severity, SyncSummary,
};
use crate::state::{FindingStore, ScanDelta, SnapshotStore};
use crate::{fingerprint, lifecycle};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Reconciles a scan batch against the stored findings for one scope.
///
/// Classification, lifecycle transitions, and the lazy suppression-expiry
/// sweep all happen in one pass, then land in the store as a single atomic
/// delta. Concurrent scans for the same scope are serialized by a
/// per-scope lock; distinct scopes run fully in parallel.
pub struct DeltaSyncEngine {
    store: Arc<dyn FindingStore>,
    snapshots: Arc<dyn SnapshotStore>,
    config: SyncConfig,
    /// Per-scope sync locks. Entries are never reclaimed; growth is
    /// bounded by the number of distinct scopes ever synced.
    scope_locks: DashMap<ScopeKey, Arc<Mutex<()>>>,
}

impl DeltaSyncEngine {
    pub fn new(
        store: Arc<dyn FindingStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            snapshots,
            config,
            scope_locks: DashMap::new(),
        }
    }

    fn scope_lock(&self, scope: &ScopeKey) -> Arc<Mutex<()>> {
        self.scope_locks
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reconcile one scan batch for a scope.
    ///
    /// Failure policy distinguishes the two ways an apply can fail. A
    /// version conflict means a single-row write (suppression) landed
    /// between load and apply: re-submitting the same delta would fail
    /// identically, so the scope is reloaded, the delta rebuilt, and the
    /// apply retried once; a second failure surfaces to the caller. Any
    /// other failure is treated as transient: the same delta is retried
    /// once, then (if enabled) the scope is replaced wholesale with the
    /// batch as all-new findings. That last path sacrifices lifecycle
    /// history and is logged as a warning on every occurrence.
    pub async fn sync_scan(&self, scope: &ScopeKey, batch: &ScanBatch) -> Result<SyncSummary> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let existing = self.store.load_scope(scope).await?;
        let (delta, summary) = self.build_delta(scope, batch, &existing, now);

        tracing::info!(
            scope = %scope,
            batch_size = batch.len(),
            created = summary.created,
            updated = summary.updated,
            resolved = summary.resolved,
            "Reconciling scan batch"
        );

        match self.store.apply_delta(scope, &delta).await {
            Ok(()) => {
                self.record_snapshot(scope, &delta, now).await;
                Ok(summary)
            }
            Err(AppError::Conflict(message)) => {
                tracing::warn!(
                    scope = %scope,
                    message = %message,
                    "Scan delta conflicted with a concurrent write, rebuilding from a fresh read"
                );

                let existing = self.store.load_scope(scope).await?;
                let (delta, summary) = self.build_delta(scope, batch, &existing, now);
                match self.store.apply_delta(scope, &delta).await {
                    Ok(()) => {
                        self.record_snapshot(scope, &delta, now).await;
                        Ok(summary)
                    }
                    Err(retry_err) => {
                        tracing::error!(
                            scope = %scope,
                            error = %retry_err,
                            "Rebuilt delta failed, surfacing to caller for external retry"
                        );
                        Err(retry_err)
                    }
                }
            }
            Err(first_err) => {
                tracing::warn!(
                    scope = %scope,
                    error = %first_err,
                    "Scan delta apply failed, retrying once"
                );

                if let Err(retry_err) = self.store.apply_delta(scope, &delta).await {
                    if !self.config.destructive_fallback_enabled {
                        tracing::error!(
                            scope = %scope,
                            error = %retry_err,
                            "Scan delta apply failed twice, surfacing failure"
                        );
                        return Err(retry_err);
                    }

                    return self.destructive_replace(scope, batch, retry_err, now).await;
                }

                self.record_snapshot(scope, &delta, now).await;
                Ok(summary)
            }
        }
    }

    /// Classify the batch against the loaded findings into the three write
    /// sets, applying lifecycle transitions and the suppression-expiry
    /// sweep as each row is touched.
    fn build_delta(
        &self,
        scope: &ScopeKey,
        batch: &ScanBatch,
        existing: &[Finding],
        now: DateTime<Utc>,
    ) -> (ScanDelta, SyncSummary) {
        let deduped = dedup_batch(batch);

        let mut by_fingerprint: HashMap<&str, &Finding> = existing
            .iter()
            .map(|finding| (finding.fingerprint.as_str(), finding))
            .collect();

        let mut delta = ScanDelta::default();

        for (fp, raw) in &deduped {
            match by_fingerprint.remove(fp.as_str()) {
                Some(found) => {
                    let mut updated = found.clone();
                    lifecycle::mark_present(&mut updated, now);
                    updated.clear_expired_suppression(now);
                    delta.updates.push(updated);
                }
                None => {
                    delta.creates.push(new_finding(scope, fp.clone(), raw, now));
                }
            }
        }

        // Whatever is left was not observed by this scan
        for leftover in by_fingerprint.into_values() {
            if leftover.is_open() {
                let mut resolved = leftover.clone();
                lifecycle::mark_absent(&mut resolved, now);
                resolved.clear_expired_suppression(now);
                delta.resolves.push(resolved);
            } else if leftover.suppression_expired(now) {
                // Expiry sweep is independent of lifecycle status
                let mut swept = leftover.clone();
                swept.clear_expired_suppression(now);
                delta.updates.push(swept);
            }
        }

        let summary = SyncSummary {
            created: delta.creates.len(),
            updated: delta.updates.len(),
            resolved: delta.resolves.len(),
        };
        (delta, summary)
    }

    /// Emergency valve: delete everything in the scope and insert the
    /// batch as all-new findings. Guarantees the scan result is never
    /// silently lost at the cost of lifecycle history.
    async fn destructive_replace(
        &self,
        scope: &ScopeKey,
        batch: &ScanBatch,
        cause: crate::error::AppError,
        now: DateTime<Utc>,
    ) -> Result<SyncSummary> {
        let replacements: Vec<Finding> = dedup_batch(batch)
            .into_iter()
            .map(|(fp, raw)| new_finding(scope, fp, raw, now))
            .collect();

        tracing::warn!(
            scope = %scope,
            cause = %cause,
            replaced_with = replacements.len(),
            "Atomic apply failed twice; falling back to destructive replace, \
             lifecycle history for this scope is lost"
        );

        let created = replacements.len();
        let delta = ScanDelta {
            creates: replacements.clone(),
            ..Default::default()
        };
        self.store.replace_scope(scope, replacements).await?;
        self.record_snapshot(scope, &delta, now).await;

        Ok(SyncSummary {
            created,
            updated: 0,
            resolved: 0,
        })
    }

    /// Record post-scan severity counts for the trend term. Bookkeeping
    /// only: a failure here must not fail a scan that already landed.
    async fn record_snapshot(&self, scope: &ScopeKey, delta: &ScanDelta, now: DateTime<Utc>) {
        let open: Vec<&Finding> = delta
            .creates
            .iter()
            .chain(delta.updates.iter())
            .filter(|finding| finding.is_open() && !finding.is_suppressed())
            .collect();

        let count = |severity: Severity| {
            open.iter()
                .filter(|finding| finding.severity == severity)
                .count()
        };

        let counts = SnapshotCounts {
            recorded_at: now,
            critical: count(Severity::Critical),
            high: count(Severity::High),
            medium: count(Severity::Medium),
            low: count(Severity::Low),
            total: open.len(),
        };

        if let Err(e) = self.snapshots.record_snapshot(scope, counts).await {
            tracing::warn!(scope = %scope, error = %e, "Failed to record trend snapshot");
        }
    }
}

/// Collapse in-batch duplicate fingerprints, first occurrence wins, so one
/// scan can advance `occurrence_count` by at most 1.
fn dedup_batch(batch: &ScanBatch) -> Vec<(String, &RawFinding)> {
    let mut seen = std::collections::HashSet::new();
    let mut deduped = Vec::with_capacity(batch.len());

    for raw in &batch.findings {
        let fp = fingerprint::for_raw(raw);
        if seen.insert(fp.clone()) {
            deduped.push((fp, raw));
        } else {
            tracing::debug!(
                scan_type = %raw.scan_type,
                title = %raw.title,
                "Duplicate fingerprint within batch, collapsing"
            );
        }
    }

    deduped
}

fn new_finding(scope: &ScopeKey, fp: String, raw: &RawFinding, now: DateTime<Utc>) -> Finding {
    Finding::new(
        scope,
        fp,
        raw.arn_or_empty(),
        raw.scan_type.clone(),
        raw.title.clone(),
        raw.severity,
        raw.resource_metadata.clone(),
        now,
    )
}
