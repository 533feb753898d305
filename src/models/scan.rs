use crate::models::Severity;
use serde::{Deserialize, Serialize};

/// One normalized finding as produced by a scanner, before reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    /// ARN of the affected resource, absent when the scanner could not
    /// determine it
    pub resource_arn: Option<String>,

    /// Scanner-local resource identifier, used for the degraded identity key
    #[serde(default)]
    pub resource_id: Option<String>,

    /// Scanner that produced the finding
    pub scan_type: String,

    /// Human-readable title
    pub title: String,

    /// Severity level
    pub severity: Severity,

    /// Scanner-specific metadata, carried through untouched
    #[serde(default)]
    pub resource_metadata: std::collections::HashMap<String, String>,
}

impl RawFinding {
    /// Best available ARN for persistence; empty when the scanner gave none
    pub fn arn_or_empty(&self) -> String {
        self.resource_arn.clone().unwrap_or_default()
    }
}

/// The full set of findings one scan run produced for a single scope.
/// Ephemeral: never persisted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanBatch {
    pub findings: Vec<RawFinding>,
}

impl ScanBatch {
    pub fn new(findings: Vec<RawFinding>) -> Self {
        Self { findings }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }
}

/// Result of reconciling one batch against the stored findings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub resolved: usize,
}
