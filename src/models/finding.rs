use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Tenant scope every engine call is keyed by. Threaded explicitly so the
/// reconciliation logic stays persistence-agnostic and testable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub organization_id: Uuid,
    pub account_id: String,
}

impl ScopeKey {
    pub fn new(organization_id: Uuid, account_id: impl Into<String>) -> Self {
        Self {
            organization_id,
            account_id: account_id.into(),
        }
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.organization_id, self.account_id)
    }
}

/// Represents a detected security issue, identified within its scope by a
/// content fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Cloud account within the organization
    pub account_id: String,

    /// Deterministic content hash (64-char lowercase hex)
    pub fingerprint: String,

    /// ARN of the affected resource (may be a degraded composite key source)
    pub resource_arn: String,

    /// Scanner that produced the finding (e.g. "s3", "iam")
    pub scan_type: String,

    /// Human-readable title
    pub title: String,

    /// Severity level
    pub severity: Severity,

    /// Current lifecycle status
    pub status: FindingStatus,

    /// First detection timestamp, immutable once set
    pub first_seen: DateTime<Utc>,

    /// Most recent detection timestamp
    pub last_seen: DateTime<Utc>,

    /// Set iff status == Resolved
    pub resolved_at: Option<DateTime<Utc>>,

    /// Number of scans that observed this finding, never decreases
    pub occurrence_count: u64,

    /// Active suppression, if any. Partial suppression states are
    /// unrepresentable: either all metadata is present or none is.
    pub suppression: Option<Suppression>,

    /// Scanner-specific metadata carried through from the batch
    #[serde(default)]
    pub resource_metadata: std::collections::HashMap<String, String>,

    /// Optimistic concurrency counter, bumped on every store write
    #[serde(default)]
    pub version: u64,
}

impl Finding {
    /// Create a finding first observed now
    pub fn new(
        scope: &ScopeKey,
        fingerprint: String,
        resource_arn: String,
        scan_type: String,
        title: String,
        severity: Severity,
        resource_metadata: std::collections::HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: scope.organization_id,
            account_id: scope.account_id.clone(),
            fingerprint,
            resource_arn,
            scan_type,
            title,
            severity,
            status: FindingStatus::New,
            first_seen: now,
            last_seen: now,
            resolved_at: None,
            occurrence_count: 1,
            suppression: None,
            resource_metadata,
            version: 0,
        }
    }

    /// Scope this finding belongs to
    pub fn scope(&self) -> ScopeKey {
        ScopeKey::new(self.organization_id, self.account_id.clone())
    }

    /// Check if the finding is in an open (unresolved) state
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            FindingStatus::New | FindingStatus::Active | FindingStatus::Reopened
        )
    }

    /// Check if the finding is currently suppressed
    pub fn is_suppressed(&self) -> bool {
        self.suppression.is_some()
    }

    /// Check if the suppression carries an expiry that has passed
    pub fn suppression_expired(&self, now: DateTime<Utc>) -> bool {
        self.suppression
            .as_ref()
            .and_then(|s| s.expires_at)
            .map(|expires| expires <= now)
            .unwrap_or(false)
    }

    /// Clear an expired suppression. Returns true if anything changed.
    pub fn clear_expired_suppression(&mut self, now: DateTime<Utc>) -> bool {
        if self.suppression_expired(now) {
            self.suppression = None;
            true
        } else {
            false
        }
    }

    /// Age of the finding relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.first_seen
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Weight of one finding of this severity in the base score deduction
    pub fn score_weight(&self) -> f64 {
        match self {
            Severity::Critical => 10.0,
            Severity::High => 5.0,
            Severity::Medium => 2.0,
            Severity::Low => 0.5,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FindingStatus {
    New,
    Active,
    Resolved,
    Reopened,
}

/// Suppression metadata. Modeled as one value so the by/at/reason/expiry
/// group is atomic: a finding is either fully suppressed or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suppression {
    pub suppressed_by: String,
    pub suppressed_at: DateTime<Utc>,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}
