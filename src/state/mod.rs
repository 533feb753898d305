pub mod factory;
pub mod memory;
pub mod sled_store;

pub use factory::create_store;
pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use crate::error::Result;
use crate::models::{Finding, FindingStatus, ScopeKey, SnapshotCounts};
use async_trait::async_trait;
use uuid::Uuid;

/// Trait for finding storage operations.
///
/// The engine owns the transition logic; implementations own physical
/// storage and must honor two contracts: `apply_delta` is all-or-nothing
/// for its scope, and every write enforces the unique
/// (organization, account, fingerprint) constraint.
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Get a finding by ID
    async fn get_finding(&self, id: &Uuid) -> Result<Option<Finding>>;

    /// Load every finding for a scope, regardless of status or suppression
    async fn load_scope(&self, scope: &ScopeKey) -> Result<Vec<Finding>>;

    /// List findings for a scope with conjunctive exact-match filters
    async fn list_findings(
        &self,
        scope: &ScopeKey,
        filter: &FindingFilter,
    ) -> Result<Vec<Finding>>;

    /// Apply a reconciliation delta atomically. Fails with `Conflict` when
    /// a create collides on fingerprint or an update's version is stale;
    /// on failure the scope is left untouched.
    async fn apply_delta(&self, scope: &ScopeKey, delta: &ScanDelta) -> Result<()>;

    /// Destructively replace all findings for a scope. Emergency path only.
    async fn replace_scope(&self, scope: &ScopeKey, findings: Vec<Finding>) -> Result<()>;

    /// Update a single finding with an optimistic version check. Returns
    /// the stored copy with its bumped version.
    async fn update_finding(&self, finding: &Finding) -> Result<Finding>;
}

/// Trait for the scan-history collaborator backing the trend term.
///
/// Two snapshots are retained per scope: the counts after the most recent
/// sync and the counts after the one before it. The trend compares the
/// live state against the latter, so it reflects change between
/// consecutive scans rather than change since the last sync (which would
/// be vacuously zero right after every sync).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Record the post-sync severity counts for a scope, retiring the
    /// prior latest snapshot to the comparison slot
    async fn record_snapshot(&self, scope: &ScopeKey, counts: SnapshotCounts) -> Result<()>;

    /// Counts recorded by the scan immediately before the most recent
    /// one. None until a scope has seen at least two syncs.
    async fn previous_snapshot(&self, scope: &ScopeKey) -> Result<Option<SnapshotCounts>>;
}

/// The two retained snapshots for a scope
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SnapshotHistory {
    pub previous: Option<SnapshotCounts>,
    pub latest: SnapshotCounts,
}

/// Filter for querying findings. All present fields must match exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindingFilter {
    pub status: Option<FindingStatus>,
    pub suppressed: Option<bool>,
}

impl FindingFilter {
    pub fn matches(&self, finding: &Finding) -> bool {
        let status_match = self
            .status
            .map(|status| finding.status == status)
            .unwrap_or(true);

        let suppressed_match = self
            .suppressed
            .map(|suppressed| finding.is_suppressed() == suppressed)
            .unwrap_or(true);

        status_match && suppressed_match
    }
}

/// The three write sets one reconciliation pass produces
#[derive(Debug, Clone, Default)]
pub struct ScanDelta {
    /// Findings with fingerprints unseen in this scope
    pub creates: Vec<Finding>,

    /// Existing findings re-seen in the batch, lifecycle applied
    pub updates: Vec<Finding>,

    /// Previously open findings absent from the batch, now resolved
    pub resolves: Vec<Finding>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.resolves.is_empty()
    }

    /// Updates and resolves as one write set
    pub fn modified(&self) -> impl Iterator<Item = &Finding> {
        self.updates.iter().chain(self.resolves.iter())
    }
}
