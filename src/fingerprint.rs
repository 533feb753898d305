//! Deterministic content-addressed identity for findings.
//!
//! Two scans that observe the same issue on the same resource must agree on
//! the fingerprint, or reconciliation degenerates into delete-and-recreate.

use crate::models::RawFinding;
use sha2::{Digest, Sha256};

/// Compute the fingerprint for a finding's identity attributes.
///
/// SHA-256 over the pipe-delimited concatenation, rendered as a 64-char
/// lowercase hex digest. Pure: no time, no randomness.
pub fn compute(resource_arn: &str, scan_type: &str, title: &str) -> String {
    digest(&[resource_arn, scan_type, title])
}

/// Fingerprint a raw batch finding, selecting the identity key.
///
/// When the scanner supplied no resource ARN, identity degrades to the
/// composite `scan_type|title|resource_id` key. This is a deliberate
/// degraded mode: distinct resources sharing a type and title can collide,
/// so the downgrade is logged rather than silent.
pub fn for_raw(raw: &RawFinding) -> String {
    match raw.resource_arn.as_deref() {
        Some(arn) if !arn.is_empty() => compute(arn, &raw.scan_type, &raw.title),
        _ => {
            let resource_id = raw.resource_id.as_deref().unwrap_or("");
            tracing::debug!(
                scan_type = %raw.scan_type,
                title = %raw.title,
                resource_id = %resource_id,
                "Resource ARN unavailable, using degraded composite identity"
            );
            digest(&[&raw.scan_type, &raw.title, resource_id])
        }
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
