//! False-positive suppression for individual findings.
//!
//! Suppression is the only mutation allowed to bypass a scan: it touches
//! one row and nothing else. Expiry is not actively swept here; the delta
//! sync engine clears expired suppressions lazily on its next pass, so
//! callers must not assume suppression vanishes exactly at `expires_at`.

use crate::error::{AppError, Result};
use crate::models::{Finding, Suppression};
use crate::state::FindingStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Manages suppression metadata on single findings
pub struct SuppressionManager {
    store: Arc<dyn FindingStore>,
}

impl SuppressionManager {
    pub fn new(store: Arc<dyn FindingStore>) -> Self {
        Self { store }
    }

    /// Suppress a finding. Idempotent: an already-suppressed finding gets
    /// its metadata overwritten with the new values.
    pub async fn suppress(
        &self,
        finding_id: &Uuid,
        suppressed_by: &str,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Finding> {
        self.write_with_retry(finding_id, |finding| {
            finding.suppression = Some(Suppression {
                suppressed_by: suppressed_by.to_string(),
                suppressed_at: Utc::now(),
                reason: reason.to_string(),
                expires_at,
            });
            true
        })
        .await
        .map(|finding| {
            tracing::info!(
                finding_id = %finding.id,
                suppressed_by = suppressed_by,
                expires_at = ?expires_at,
                "Finding suppressed"
            );
            finding
        })
    }

    /// Remove suppression from a finding. Idempotent: unsuppressing a
    /// non-suppressed finding is a no-op success.
    pub async fn unsuppress(&self, finding_id: &Uuid) -> Result<Finding> {
        self.write_with_retry(finding_id, |finding| {
            if finding.suppression.is_none() {
                return false;
            }
            finding.suppression = None;
            true
        })
        .await
        .map(|finding| {
            tracing::info!(finding_id = %finding.id, "Finding unsuppressed");
            finding
        })
    }

    /// Apply a mutation to one finding with an optimistic version check,
    /// retried once on conflict with an in-flight scan. The mutation
    /// returns false to signal a no-op (nothing is written).
    async fn write_with_retry<F>(&self, finding_id: &Uuid, mutate: F) -> Result<Finding>
    where
        F: Fn(&mut Finding) -> bool,
    {
        for attempt in 0..2 {
            let mut finding = self
                .store
                .get_finding(finding_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Finding {} not found", finding_id)))?;

            if !mutate(&mut finding) {
                return Ok(finding);
            }

            match self.store.update_finding(&finding).await {
                Ok(updated) => return Ok(updated),
                Err(AppError::Conflict(message)) if attempt == 0 => {
                    tracing::debug!(
                        finding_id = %finding_id,
                        message = %message,
                        "Suppression write conflicted, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(format!(
            "Suppression write for finding {} conflicted twice",
            finding_id
        )))
    }
}
