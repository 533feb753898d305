use crate::error::{AppError, Result};
use crate::models::{Finding, ScopeKey, SnapshotCounts};
use crate::state::{FindingFilter, FindingStore, ScanDelta, SnapshotHistory, SnapshotStore};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory finding store (for MVP and testing).
///
/// A per-scope mutex makes `apply_delta` and `replace_scope` atomic with
/// respect to each other; all validation happens before the first write so
/// a failed delta leaves the scope untouched.
#[derive(Clone)]
pub struct InMemoryStore {
    findings: Arc<DashMap<Uuid, Finding>>,
    /// fingerprint -> finding id, per scope
    scope_index: Arc<DashMap<ScopeKey, HashMap<String, Uuid>>>,
    /// Per-scope write locks. Entries are never reclaimed; growth is
    /// bounded by the number of distinct scopes ever written.
    scope_locks: Arc<DashMap<ScopeKey, Arc<Mutex<()>>>>,
    snapshots: Arc<DashMap<ScopeKey, SnapshotHistory>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            findings: Arc::new(DashMap::new()),
            scope_index: Arc::new(DashMap::new()),
            scope_locks: Arc::new(DashMap::new()),
            snapshots: Arc::new(DashMap::new()),
        }
    }

    fn scope_lock(&self, scope: &ScopeKey) -> Arc<Mutex<()>> {
        self.scope_locks
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn validate_delta(&self, scope: &ScopeKey, delta: &ScanDelta) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for create in &delta.creates {
            if !seen.insert(create.fingerprint.as_str()) {
                return Err(AppError::Conflict(format!(
                    "Duplicate fingerprint {} within delta for scope {}",
                    create.fingerprint, scope
                )));
            }
            if let Some(index) = self.scope_index.get(scope) {
                if index.contains_key(&create.fingerprint) {
                    return Err(AppError::Conflict(format!(
                        "Fingerprint {} already exists in scope {}",
                        create.fingerprint, scope
                    )));
                }
            }
        }

        for modified in delta.modified() {
            match self.findings.get(&modified.id) {
                Some(stored) if stored.version != modified.version => {
                    return Err(AppError::Conflict(format!(
                        "Stale version for finding {} (stored {}, given {})",
                        modified.id, stored.version, modified.version
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(AppError::NotFound(format!(
                        "Finding {} not found",
                        modified.id
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FindingStore for InMemoryStore {
    async fn get_finding(&self, id: &Uuid) -> Result<Option<Finding>> {
        Ok(self.findings.get(id).map(|entry| entry.clone()))
    }

    async fn load_scope(&self, scope: &ScopeKey) -> Result<Vec<Finding>> {
        let ids: Vec<Uuid> = self
            .scope_index
            .get(scope)
            .map(|index| index.values().copied().collect())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.findings.get(id).map(|entry| entry.clone()))
            .collect())
    }

    async fn list_findings(
        &self,
        scope: &ScopeKey,
        filter: &FindingFilter,
    ) -> Result<Vec<Finding>> {
        let mut findings: Vec<Finding> = self
            .load_scope(scope)
            .await?
            .into_iter()
            .filter(|finding| filter.matches(finding))
            .collect();

        // Sort by first detection (newest first) for stable listings
        findings.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        Ok(findings)
    }

    async fn apply_delta(&self, scope: &ScopeKey, delta: &ScanDelta) -> Result<()> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock();

        self.validate_delta(scope, delta)?;

        let mut index = self.scope_index.entry(scope.clone()).or_default();

        for create in &delta.creates {
            self.findings.insert(create.id, create.clone());
            index.insert(create.fingerprint.clone(), create.id);
        }

        for modified in delta.modified() {
            let mut stored = modified.clone();
            stored.version += 1;
            self.findings.insert(stored.id, stored);
        }

        tracing::debug!(
            scope = %scope,
            creates = delta.creates.len(),
            updates = delta.updates.len(),
            resolves = delta.resolves.len(),
            "Scan delta applied"
        );
        Ok(())
    }

    async fn replace_scope(&self, scope: &ScopeKey, findings: Vec<Finding>) -> Result<()> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock();

        if let Some((_, old_index)) = self.scope_index.remove(scope) {
            for id in old_index.values() {
                self.findings.remove(id);
            }
        }

        let mut index = HashMap::with_capacity(findings.len());
        for finding in findings {
            index.insert(finding.fingerprint.clone(), finding.id);
            self.findings.insert(finding.id, finding);
        }
        self.scope_index.insert(scope.clone(), index);

        tracing::debug!(scope = %scope, "Scope replaced");
        Ok(())
    }

    async fn update_finding(&self, finding: &Finding) -> Result<Finding> {
        let lock = self.scope_lock(&finding.scope());
        let _guard = lock.lock();

        // Copy the stored version out before writing; holding a map ref
        // across the insert would lock the shard against itself.
        let stored_version = self.findings.get(&finding.id).map(|entry| entry.version);

        match stored_version {
            Some(version) if version != finding.version => Err(AppError::Conflict(format!(
                "Stale version for finding {} (stored {}, given {})",
                finding.id, version, finding.version
            ))),
            Some(_) => {
                let mut updated = finding.clone();
                updated.version += 1;
                self.findings.insert(updated.id, updated.clone());
                tracing::debug!(finding_id = %updated.id, "Finding updated");
                Ok(updated)
            }
            None => Err(AppError::NotFound(format!(
                "Finding {} not found",
                finding.id
            ))),
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn record_snapshot(&self, scope: &ScopeKey, counts: SnapshotCounts) -> Result<()> {
        let previous = self
            .snapshots
            .get(scope)
            .map(|entry| entry.latest.clone());
        self.snapshots
            .insert(scope.clone(), SnapshotHistory { previous, latest: counts });
        Ok(())
    }

    async fn previous_snapshot(&self, scope: &ScopeKey) -> Result<Option<SnapshotCounts>> {
        Ok(self
            .snapshots
            .get(scope)
            .and_then(|entry| entry.previous.clone()))
    }
}
