//! HTTP surface tests: requests through the full router against an
//! in-memory backend.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use posture_engine::api::{build_router, AppState};
use posture_engine::config::SyncConfig;
use posture_engine::scoring::PostureScorer;
use posture_engine::state::InMemoryStore;
use posture_engine::suppression::SuppressionManager;
use posture_engine::sync::DeltaSyncEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(DeltaSyncEngine::new(
        store.clone(),
        store.clone(),
        SyncConfig::default(),
    ));
    let suppression = Arc::new(SuppressionManager::new(store.clone()));
    let scorer = Arc::new(PostureScorer::new(store.clone(), store.clone(), 38));

    build_router(AppState::new(engine, suppression, scorer, store))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn sync_body(org: Uuid, findings: Value) -> Value {
    json!({
        "organization_id": org,
        "account_id": "123456789012",
        "findings": findings,
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = app();
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_sync_then_list_findings() {
    let app = app();
    let org = Uuid::new_v4();

    let (status, body) = send(
        &app,
        post_json(
            "/v1/scans/sync",
            sync_body(
                org,
                json!([
                    {
                        "resource_arn": "arn:aws:s3:::b1",
                        "scan_type": "s3",
                        "title": "public-bucket",
                        "severity": "high"
                    },
                    {
                        "resource_arn": "arn:aws:iam::1:root",
                        "scan_type": "iam",
                        "title": "root-access-keys",
                        "severity": "critical"
                    }
                ]),
            ),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 2);
    assert_eq!(body["updated"], 0);
    assert_eq!(body["resolved"], 0);

    let uri = format!(
        "/v1/findings?organization_id={}&account_id=123456789012",
        org
    );
    let (status, body) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["findings"][0]["status"], "new");
    assert_eq!(body["findings"][0]["suppressed"], false);
}

#[tokio::test]
async fn test_list_findings_status_filter() {
    let app = app();
    let org = Uuid::new_v4();

    let finding = json!([{
        "resource_arn": "arn:aws:s3:::b1",
        "scan_type": "s3",
        "title": "public-bucket",
        "severity": "high"
    }]);

    send(&app, post_json("/v1/scans/sync", sync_body(org, finding))).await;
    // Empty scan resolves the finding
    send(&app, post_json("/v1/scans/sync", sync_body(org, json!([])))).await;

    let uri = format!(
        "/v1/findings?organization_id={}&account_id=123456789012&status=resolved",
        org
    );
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let uri = format!(
        "/v1/findings?organization_id={}&account_id=123456789012&status=active",
        org
    );
    let (_, body) = send(&app, get(&uri)).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_suppress_and_unsuppress_round_trip() {
    let app = app();
    let org = Uuid::new_v4();

    let finding = json!([{
        "resource_arn": "arn:aws:s3:::b1",
        "scan_type": "s3",
        "title": "public-bucket",
        "severity": "high"
    }]);
    send(&app, post_json("/v1/scans/sync", sync_body(org, finding))).await;

    let uri = format!(
        "/v1/findings?organization_id={}&account_id=123456789012",
        org
    );
    let (_, body) = send(&app, get(&uri)).await;
    let id = body["findings"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post_json(
            &format!("/v1/findings/{}/suppress", id),
            json!({
                "suppressed_by": "analyst@example.com",
                "reason": "known false positive"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["suppressed"], true);
    assert_eq!(body["suppressed_by"], "analyst@example.com");
    assert_eq!(body["suppression_reason"], "known false positive");

    let (status, body) = send(
        &app,
        post_json(&format!("/v1/findings/{}/unsuppress", id), json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["suppressed"], false);
    assert_eq!(body["suppressed_by"], Value::Null);
}

#[tokio::test]
async fn test_suppress_missing_finding_is_404() {
    let app = app();

    let (status, body) = send(
        &app,
        post_json(
            &format!("/v1/findings/{}/suppress", Uuid::new_v4()),
            json!({
                "suppressed_by": "analyst@example.com",
                "reason": "noise"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_suppress_validation_failure_is_400() {
    let app = app();

    let (status, _) = send(
        &app,
        post_json(
            &format!("/v1/findings/{}/suppress", Uuid::new_v4()),
            json!({
                "suppressed_by": "",
                "reason": "noise"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_posture_score_endpoint() {
    let app = app();
    let org = Uuid::new_v4();

    send(
        &app,
        post_json(
            "/v1/scans/sync",
            sync_body(
                org,
                json!([{
                    "resource_arn": "arn:aws:iam::1:root",
                    "scan_type": "iam",
                    "title": "root-access-keys",
                    "severity": "critical"
                }]),
            ),
        ),
    )
    .await;

    let uri = format!(
        "/v1/posture/score?organization_id={}&account_id=123456789012",
        org
    );
    let (status, body) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["findings"]["critical"], 1);
    assert_eq!(body["risk_level"], "low");
    assert_eq!(body["trend"]["direction"], "stable");
    assert!(body["overall_score"].as_f64().unwrap() <= 100.0);
    assert_eq!(body["breakdown"]["base_score"], 90.0);
}

#[tokio::test]
async fn test_posture_score_empty_scope() {
    let app = app();

    let uri = format!(
        "/v1/posture/score?organization_id={}&account_id=123456789012",
        Uuid::new_v4()
    );
    let (status, body) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall_score"], 100.0);
    assert_eq!(body["risk_level"], "low");
}
