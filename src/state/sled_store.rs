use crate::error::{AppError, Result};
use crate::models::{Finding, ScopeKey, SnapshotCounts};
use crate::state::{FindingFilter, FindingStore, ScanDelta, SnapshotHistory, SnapshotStore};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::Db;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Persistent finding store using the Sled embedded database.
///
/// Three trees: finding rows keyed by id, a scope index keyed by
/// `org/account\0fingerprint` that enforces the unique fingerprint
/// constraint, and per-scope trend snapshots. Delta application runs as a
/// sled transaction over the first two trees, so a failed batch leaves the
/// scope untouched.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    findings_tree: sled::Tree,
    index_tree: sled::Tree,
    snapshots_tree: sled::Tree,
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref();
        let db = sled::open(&path)
            .map_err(|e| AppError::Database(format!("Failed to open Sled database: {}", e)))?;

        let findings_tree = db
            .open_tree("findings")
            .map_err(|e| AppError::Database(format!("Failed to open findings tree: {}", e)))?;

        let index_tree = db
            .open_tree("scope_index")
            .map_err(|e| AppError::Database(format!("Failed to open scope index tree: {}", e)))?;

        let snapshots_tree = db
            .open_tree("snapshots")
            .map_err(|e| AppError::Database(format!("Failed to open snapshots tree: {}", e)))?;

        tracing::info!("Initialized Sled store at {:?}", path_str);

        Ok(Self {
            db: Arc::new(db),
            findings_tree,
            index_tree,
            snapshots_tree,
        })
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value)
            .map_err(|e| AppError::Serialization(format!("Failed to serialize row: {}", e)))
    }

    fn deserialize_finding(bytes: &[u8]) -> Result<Finding> {
        bincode::deserialize(bytes)
            .map_err(|e| AppError::Serialization(format!("Failed to deserialize finding: {}", e)))
    }

    fn finding_key(id: &Uuid) -> Vec<u8> {
        id.as_bytes().to_vec()
    }

    /// Scope prefix for index keys; NUL separates the scope from the
    /// fingerprint so prefixes never alias
    fn scope_prefix(scope: &ScopeKey) -> Vec<u8> {
        let mut key = format!("{}/{}", scope.organization_id, scope.account_id).into_bytes();
        key.push(0);
        key
    }

    fn index_key(scope: &ScopeKey, fingerprint: &str) -> Vec<u8> {
        let mut key = Self::scope_prefix(scope);
        key.extend_from_slice(fingerprint.as_bytes());
        key
    }

    fn snapshot_key(scope: &ScopeKey) -> Vec<u8> {
        format!("{}/{}", scope.organization_id, scope.account_id).into_bytes()
    }

    fn reject_in_batch_duplicates(scope: &ScopeKey, delta: &ScanDelta) -> Result<()> {
        let mut seen = HashSet::new();
        for create in &delta.creates {
            if !seen.insert(create.fingerprint.as_str()) {
                return Err(AppError::Conflict(format!(
                    "Duplicate fingerprint {} within delta for scope {}",
                    create.fingerprint, scope
                )));
            }
        }
        Ok(())
    }

    fn snapshot_history(&self, scope: &ScopeKey) -> Result<Option<SnapshotHistory>> {
        match self.snapshots_tree.get(Self::snapshot_key(scope)) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).map(Some).map_err(|e| {
                AppError::Serialization(format!("Failed to deserialize snapshot: {}", e))
            }),
            Ok(None) => Ok(None),
            Err(e) => Err(AppError::Database(format!(
                "Failed to query snapshots: {}",
                e
            ))),
        }
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::Database(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

type TxError = ConflictableTransactionError<AppError>;

fn tx_serialize<T: serde::Serialize>(value: &T) -> std::result::Result<Vec<u8>, TxError> {
    bincode::serialize(value).map_err(|e| {
        ConflictableTransactionError::Abort(AppError::Serialization(format!(
            "Failed to serialize row: {}",
            e
        )))
    })
}

fn tx_deserialize_finding(bytes: &[u8]) -> std::result::Result<Finding, TxError> {
    bincode::deserialize(bytes).map_err(|e| {
        ConflictableTransactionError::Abort(AppError::Serialization(format!(
            "Failed to deserialize finding: {}",
            e
        )))
    })
}

fn unwrap_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => AppError::Database(e.to_string()),
    }
}

#[async_trait]
impl FindingStore for SledStore {
    async fn get_finding(&self, id: &Uuid) -> Result<Option<Finding>> {
        match self.findings_tree.get(Self::finding_key(id)) {
            Ok(Some(bytes)) => Ok(Some(Self::deserialize_finding(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(AppError::Database(format!("Failed to get finding: {}", e))),
        }
    }

    async fn load_scope(&self, scope: &ScopeKey) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();

        for entry in self.index_tree.scan_prefix(Self::scope_prefix(scope)) {
            let (_, id_bytes) = entry
                .map_err(|e| AppError::Database(format!("Failed to scan scope index: {}", e)))?;

            if let Some(bytes) = self
                .findings_tree
                .get(&id_bytes)
                .map_err(|e| AppError::Database(format!("Failed to get finding: {}", e)))?
            {
                findings.push(Self::deserialize_finding(&bytes)?);
            }
        }

        Ok(findings)
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

        findings.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        Ok(findings)
    }

    async fn apply_delta(&self, scope: &ScopeKey, delta: &ScanDelta) -> Result<()> {
        Self::reject_in_batch_duplicates(scope, delta)?;

        let result = (&self.findings_tree, &self.index_tree).transaction(|(findings, index)| {
            for create in &delta.creates {
                let index_key = Self::index_key(scope, &create.fingerprint);
                if index.get(&index_key)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(AppError::Conflict(
                        format!(
                            "Fingerprint {} already exists in scope {}",
                            create.fingerprint, scope
                        ),
                    )));
                }
                findings.insert(Self::finding_key(&create.id), tx_serialize(create)?)?;
                index.insert(index_key, Self::finding_key(&create.id))?;
            }

            for modified in delta.modified() {
                let key = Self::finding_key(&modified.id);
                let stored_bytes = tx_get_required(findings, &key, &modified.id)?;
                let stored = tx_deserialize_finding(&stored_bytes)?;
                if stored.version != modified.version {
                    return Err(ConflictableTransactionError::Abort(AppError::Conflict(
                        format!(
                            "Stale version for finding {} (stored {}, given {})",
                            modified.id, stored.version, modified.version
                        ),
                    )));
                }
                let mut next = modified.clone();
                next.version += 1;
                findings.insert(key, tx_serialize(&next)?)?;
            }

            Ok(())
        });

        result.map_err(unwrap_tx_error)?;

        self.findings_tree
            .flush()
            .map_err(|e| AppError::Database(format!("Failed to flush findings tree: {}", e)))?;

        tracing::debug!(
            scope = %scope,
            creates = delta.creates.len(),
            updates = delta.updates.len(),
            resolves = delta.resolves.len(),
            "Scan delta applied to Sled"
        );
        Ok(())
    }

    async fn replace_scope(&self, scope: &ScopeKey, new_findings: Vec<Finding>) -> Result<()> {
        // Collect current scope rows first; the sync engine serializes
        // writers per scope, so this snapshot cannot race another writer.
        let mut old_keys = Vec::new();
        for entry in self.index_tree.scan_prefix(Self::scope_prefix(scope)) {
            let (index_key, id_bytes) = entry
                .map_err(|e| AppError::Database(format!("Failed to scan scope index: {}", e)))?;
            old_keys.push((index_key.to_vec(), id_bytes.to_vec()));
        }

        let result = (&self.findings_tree, &self.index_tree).transaction(|(findings, index)| {
            for (index_key, id_bytes) in &old_keys {
                index.remove(index_key.as_slice())?;
                findings.remove(id_bytes.as_slice())?;
            }

            for finding in &new_findings {
                findings.insert(Self::finding_key(&finding.id), tx_serialize(finding)?)?;
                index.insert(
                    Self::index_key(scope, &finding.fingerprint),
                    Self::finding_key(&finding.id),
                )?;
            }

            Ok(())
        });

        result.map_err(unwrap_tx_error)?;

        self.findings_tree
            .flush()
            .map_err(|e| AppError::Database(format!("Failed to flush findings tree: {}", e)))?;

        tracing::debug!(scope = %scope, "Scope replaced in Sled");
        Ok(())
    }

    async fn update_finding(&self, finding: &Finding) -> Result<Finding> {
        let result = self.findings_tree.transaction(|findings| {
            let key = Self::finding_key(&finding.id);
            let stored_bytes = tx_get_required(findings, &key, &finding.id)?;
            let stored = tx_deserialize_finding(&stored_bytes)?;
            if stored.version != finding.version {
                return Err(ConflictableTransactionError::Abort(AppError::Conflict(
                    format!(
                        "Stale version for finding {} (stored {}, given {})",
                        finding.id, stored.version, finding.version
                    ),
                )));
            }
            let mut next = finding.clone();
            next.version += 1;
            findings.insert(key, tx_serialize(&next)?)?;
            Ok(next)
        });

        let updated = result.map_err(unwrap_tx_error)?;

        self.findings_tree
            .flush()
            .map_err(|e| AppError::Database(format!("Failed to flush findings tree: {}", e)))?;

        tracing::debug!(finding_id = %updated.id, "Finding updated in Sled");
        Ok(updated)
    }
}

/// Fetch a row inside a transaction, aborting with NotFound when absent
fn tx_get_required(
    tree: &sled::transaction::TransactionalTree,
    key: &[u8],
    id: &Uuid,
) -> std::result::Result<sled::IVec, TxError> {
    match tree.get(key)? {
        Some(bytes) => Ok(bytes),
        None => Err(ConflictableTransactionError::Abort(AppError::NotFound(
            format!("Finding {} not found", id),
        ))),
    }
}

#[async_trait]
impl SnapshotStore for SledStore {
    async fn record_snapshot(&self, scope: &ScopeKey, counts: SnapshotCounts) -> Result<()> {
        let previous = self.snapshot_history(scope)?.map(|history| history.latest);
        let value = Self::serialize(&SnapshotHistory {
            previous,
            latest: counts,
        })?;
        self.snapshots_tree
            .insert(Self::snapshot_key(scope), value)
            .map_err(|e| AppError::Database(format!("Failed to record snapshot: {}", e)))?;
        Ok(())
    }

    async fn previous_snapshot(&self, scope: &ScopeKey) -> Result<Option<SnapshotCounts>> {
        Ok(self
            .snapshot_history(scope)?
            .and_then(|history| history.previous))
    }
}
