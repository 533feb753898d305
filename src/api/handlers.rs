use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::state::FindingFilter;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// Health check endpoint
pub async fn health_check() -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Ingest one scan batch for a scope and reconcile it against the stored
/// findings
pub async fn sync_scan(
    State(state): State<AppState>,
    Json(request): Json<SyncScanRequest>,
) -> Result<Json<SyncScanResponse>> {
    request.validate()?;

    let scope = ScopeKey::new(request.organization_id, request.account_id);
    let batch = ScanBatch::new(request.findings);

    let summary = state.engine.sync_scan(&scope, &batch).await?;

    Ok(Json(SyncScanResponse {
        created: summary.created,
        updated: summary.updated,
        resolved: summary.resolved,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SyncScanRequest {
    pub organization_id: Uuid,
    #[validate(length(min = 1))]
    pub account_id: String,
    pub findings: Vec<RawFinding>,
}

#[derive(Debug, Serialize)]
pub struct SyncScanResponse {
    pub created: usize,
    pub updated: usize,
    pub resolved: usize,
}

/// Get a finding by ID
pub async fn get_finding(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FindingResponse>> {
    let finding = state
        .store
        .get_finding(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Finding {} not found", id)))?;

    Ok(Json(FindingResponse::from(finding)))
}

/// List findings for a scope
pub async fn list_findings(
    State(state): State<AppState>,
    Query(params): Query<ListFindingsQuery>,
) -> Result<Json<ListFindingsResponse>> {
    let scope = ScopeKey::new(params.organization_id, params.account_id);
    let filter = FindingFilter {
        status: params.status,
        suppressed: params.suppressed,
    };

    let findings = state.store.list_findings(&scope, &filter).await?;

    Ok(Json(ListFindingsResponse {
        total: findings.len(),
        findings: findings.into_iter().map(FindingResponse::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListFindingsQuery {
    pub organization_id: Uuid,
    pub account_id: String,
    pub status: Option<FindingStatus>,
    pub suppressed: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ListFindingsResponse {
    pub findings: Vec<FindingResponse>,
    pub total: usize,
}

/// Suppress a finding
pub async fn suppress_finding(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SuppressRequest>,
) -> Result<Json<FindingResponse>> {
    request.validate()?;

    let finding = state
        .suppression
        .suppress(&id, &request.suppressed_by, &request.reason, request.expires_at)
        .await?;

    Ok(Json(FindingResponse::from(finding)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SuppressRequest {
    #[validate(length(min = 1))]
    pub suppressed_by: String,
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Remove suppression from a finding
pub async fn unsuppress_finding(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FindingResponse>> {
    let finding = state.suppression.unsuppress(&id).await?;
    Ok(Json(FindingResponse::from(finding)))
}

/// Compute the current posture score for a scope
pub async fn get_posture_score(
    State(state): State<AppState>,
    Query(params): Query<PostureScoreQuery>,
) -> Result<Json<PostureScore>> {
    let scope = ScopeKey::new(params.organization_id, params.account_id);
    let score = state.scorer.score(&scope).await?;
    Ok(Json(score))
}

#[derive(Debug, Deserialize)]
pub struct PostureScoreQuery {
    pub organization_id: Uuid,
    pub account_id: String,
}

/// Finding response DTO. Suppression is flattened to nullable fields at
/// the boundary so clients do not need the nested representation.
#[derive(Debug, Serialize)]
pub struct FindingResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub account_id: String,
    pub fingerprint: String,
    pub resource_arn: String,
    pub scan_type: String,
    pub title: String,
    pub severity: Severity,
    pub status: FindingStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub occurrence_count: u64,
    pub suppressed: bool,
    pub suppressed_by: Option<String>,
    pub suppressed_at: Option<DateTime<Utc>>,
    pub suppression_reason: Option<String>,
    pub suppression_expires_at: Option<DateTime<Utc>>,
    pub resource_metadata: HashMap<String, String>,
}

impl From<Finding> for FindingResponse {
    fn from(finding: Finding) -> Self {
        let suppression = finding.suppression;
        Self {
            id: finding.id,
            organization_id: finding.organization_id,
            account_id: finding.account_id,
            fingerprint: finding.fingerprint,
            resource_arn: finding.resource_arn,
            scan_type: finding.scan_type,
            title: finding.title,
            severity: finding.severity,
            status: finding.status,
            first_seen: finding.first_seen,
            last_seen: finding.last_seen,
            resolved_at: finding.resolved_at,
            occurrence_count: finding.occurrence_count,
            suppressed: suppression.is_some(),
            suppressed_by: suppression.as_ref().map(|s| s.suppressed_by.clone()),
            suppressed_at: suppression.as_ref().map(|s| s.suppressed_at),
            suppression_reason: suppression.as_ref().map(|s| s.reason.clone()),
            suppression_expires_at: suppression.as_ref().and_then(|s| s.expires_at),
            resource_metadata: finding.resource_metadata,
        }
    }
}
