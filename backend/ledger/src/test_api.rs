//! Router tests: requests go through the full axum stack via `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::api::{router, ApiState};
use crate::reviewer::Reviewer;
use crate::test_service::{harness, Harness};

fn app(h: &Harness, reviewer: Option<Reviewer>) -> Router {
    router(Arc::new(ApiState {
        service: h.service.clone(),
        reviewer,
    }))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Create a beneficiary and fund it fully; returns its id.
async fn funded(app: &Router, name: &str, need: u64) -> i64 {
    let (status, b) = send(
        app,
        "POST",
        "/beneficiaries",
        Some(json!({ "name": name, "need": need })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = b["id"].as_i64().unwrap();

    let (status, _) = send(
        app,
        "POST",
        &format!("/beneficiaries/{id}/donations"),
        Some(json!({ "amount": need })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    id
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness().await;
    let (status, body) = send(&app(&h, None), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn beneficiary_is_created_and_listed() {
    let h = harness().await;
    let app = app(&h, None);

    let (status, created) = send(
        &app,
        "POST",
        "/beneficiaries",
        Some(json!({ "name": "Cindy Lee", "need": 1000, "story": "School supplies" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Cindy Lee");
    assert_eq!(created["need"], "1000");
    assert_eq!(created["released"], false);

    let (status, list) = send(&app, "GET", "/beneficiaries", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
    assert_eq!(list["beneficiaries"][0]["story"], "School supplies");
}

#[tokio::test]
async fn full_flow_over_http() {
    let h = harness().await;
    let app = app(&h, None);
    let id = funded(&app, "Cindy Lee", 1000).await;

    let (status, submitted) = send(
        &app,
        "POST",
        &format!("/beneficiaries/{id}/proofs"),
        Some(json!({ "filename": "invoice.pdf", "content_base64": encode(b"invoice") })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submitted["proof"]["status"], "reviewing");
    assert_eq!(submitted["review_in_secs"], Value::Null);
    let hash = submitted["proof"]["hash"].as_str().unwrap().to_string();

    let (status, detail) = send(&app, "GET", &format!("/proofs/{hash}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["blob_intact"], true);

    let (status, verified) = send(&app, "POST", &format!("/proofs/{hash}/verify"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["proof"]["status"], "verified");
    assert_eq!(verified["beneficiary"]["released"], true);
    assert_eq!(verified["beneficiary"]["doc_hash"], hash.as_str());

    let (_, ledger) = send(&app, "GET", "/ledger?order=newest", None).await;
    assert_eq!(ledger["count"], 5);
    assert_eq!(ledger["entries"][0]["type"], "release");
    assert_eq!(ledger["entries"][4]["type"], "donation");

    let (_, history) = send(&app, "GET", &format!("/beneficiaries/{id}"), None).await;
    assert_eq!(history["entries"].as_array().unwrap().len(), 5);

    let (status, release) = send(&app, "POST", &format!("/beneficiaries/{id}/release"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(release["entries"], json!([]));

    let (_, summary) = send(&app, "GET", "/summary", None).await;
    assert_eq!(summary["released"], 1);
    assert_eq!(summary["beneficiaries"], 1);
}

#[tokio::test]
async fn csv_export_is_served_as_text_csv() {
    let h = harness().await;
    let app = app(&h, None);
    funded(&app, "Ben Wong", 1500).await;

    let request = Request::builder()
        .uri("/ledger/export.csv")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/csv"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv.starts_with("time,type,beneficiary_id"));
    assert!(csv.contains(",donation,1,Ben Wong,1500.00,"));
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let h = harness().await;
    let app = app(&h, None);

    let (status, body) = send(&app, "GET", "/beneficiaries/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("beneficiary 99"));

    let (_, b) = send(
        &app,
        "POST",
        "/beneficiaries",
        Some(json!({ "name": "Alice Chan", "need": 2000 })),
    )
    .await;
    let id = b["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/beneficiaries/{id}/donations"),
        Some(json!({ "amount": -5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/beneficiaries/{id}/proofs"),
        Some(json!({ "filename": "early.pdf", "content_base64": encode(b"early") })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/beneficiaries/{id}/proofs"),
        Some(json!({ "filename": "bad.pdf", "content_base64": "not base64!" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", &format!("/proofs/{}/reject", "a".repeat(64)), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deciding_a_proof_twice_is_a_conflict() {
    let h = harness().await;
    let app = app(&h, None);
    let id = funded(&app, "Ben Wong", 500).await;

    let (_, submitted) = send(
        &app,
        "POST",
        &format!("/beneficiaries/{id}/proofs"),
        Some(json!({ "filename": "proof.pdf", "content_base64": encode(b"proof") })),
    )
    .await;
    let hash = submitted["proof"]["hash"].as_str().unwrap().to_string();

    let (status, rejected) = send(&app, "POST", &format!("/proofs/{hash}/reject"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["proof"]["status"], "rejected");

    let (status, body) = send(&app, "POST", &format!("/proofs/{hash}/verify"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("rejected"));

    let (_, list) = send(&app, "GET", "/proofs", None).await;
    assert_eq!(list["count"], 1);
}

#[tokio::test]
async fn scheduled_review_verifies_and_releases() {
    let h = harness().await;
    let reviewer = Reviewer::new(h.service.clone(), Duration::ZERO, CancellationToken::new());
    let app = app(&h, Some(reviewer));
    let id = funded(&app, "Alice Chan", 2000).await;

    let (status, submitted) = send(
        &app,
        "POST",
        &format!("/beneficiaries/{id}/proofs"),
        Some(json!({ "filename": "proof.pdf", "content_base64": encode(b"alice") })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submitted["review_in_secs"], 0);

    let mut released = false;
    for _ in 0..200 {
        let b = h.service.get_beneficiary(id).await.unwrap();
        if b.released {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "automatic review did not release funds");
}

#[tokio::test]
async fn cancelled_review_leaves_proof_pending() {
    let h = harness().await;
    let token = CancellationToken::new();
    let reviewer = Reviewer::new(h.service.clone(), Duration::from_secs(3600), token.clone());
    let app = app(&h, Some(reviewer.clone()));
    let id = funded(&app, "Cindy Lee", 1000).await;

    let proof = h
        .service
        .submit_proof(id, "proof.pdf", b"cindy")
        .await
        .unwrap();
    let task = reviewer.schedule(proof.hash.clone());
    token.cancel();
    task.await.unwrap();

    let (_, detail) = send(&app, "GET", &format!("/proofs/{}", proof.hash), None).await;
    assert_eq!(detail["proof"]["status"], "reviewing");
}
