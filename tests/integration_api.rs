//! API Integration Tests
//!
//! Drive the router end to end over the in-memory store and queue.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use tower::util::ServiceExt;

use balance_ledger::jobs::ResetWorker;
use balance_ledger::jobs::WorkerConfig;

mod common;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

fn post(uri: &str, user: Option<i64>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("X-Request-User-Id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-Request-User-Id", user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn with_service_key(mut request: Request<Body>, key: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-api-key", key.parse().unwrap());
    request
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal serialized as string")).unwrap()
}

async fn open(app: &Router, id: i64) {
    let request = with_service_key(post("/accounts", None, json!({ "id": id })), common::SERVICE_KEY);
    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED, "opening account {id} failed");
}

#[tokio::test]
async fn test_health() {
    let app = common::memory_app();
    let (status, body) = send(&app.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test]
async fn test_correlation_id_echoed() {
    let app = common::memory_app();
    let correlation_id = "0b6f2a3e-8d4c-4f1a-9e2b-7c5d3a1f0e9d";

    let request = Request::builder()
        .uri("/health")
        .header("X-Correlation-Id", correlation_id)
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-correlation-id"], correlation_id);

    // A fresh id is issued when the caller sends none
    let response = app.router.clone().oneshot(get("/health", None)).await.unwrap();
    assert!(response.headers().contains_key("x-correlation-id"));
}

#[tokio::test]
async fn test_worked_example_over_http() {
    let app = common::memory_app();
    open(&app.router, 1).await;
    open(&app.router, 2).await;

    // 1. Top up A
    let (status, body) = send(&app.router, post("/balance/add", Some(1), json!({ "amount": 100 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "adding");
    assert_eq!(body["user_id"], 1);
    assert_eq!(decimal(&body["amount"]), Decimal::from(100));

    // 2. Transfer A -> B
    let (status, body) = send(
        &app.router,
        post("/balance/transfer/2", Some(1), json!({ "amount": "40.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sender_transaction"]["type"], "subtraction");
    assert_eq!(body["sender_transaction"]["user_id"], 1);
    assert_eq!(body["recipient_transaction"]["type"], "adding");
    assert_eq!(body["recipient_transaction"]["user_id"], 2);

    // 3. Overdraw A
    let (status, body) = send(
        &app.router,
        post("/balance/subtract", Some(1), json!({ "amount": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "insufficient_funds");

    let (_, body) = send(&app.router, get("/balance", Some(1))).await;
    assert_eq!(decimal(&body["balance"]), Decimal::from(60));
    let (_, body) = send(&app.router, get("/balance", Some(2))).await;
    assert_eq!(decimal(&body["balance"]), Decimal::from(40));
}

#[tokio::test]
async fn test_user_header_required() {
    let app = common::memory_app();

    let (status, body) = send(&app.router, get("/balance/transactions", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "missing_header");

    let request = Request::builder()
        .uri("/balance/transactions")
        .header("X-Request-User-Id", "not-a-number")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_header");
}

#[tokio::test]
async fn test_amount_validation() {
    let app = common::memory_app();
    open(&app.router, 1).await;

    let cases = [
        (json!({ "amount": 5 }), "invalid_amount"),
        (json!({ "amount": 0 }), "negative_amount"),
        (json!({ "amount": "-20" }), "negative_amount"),
        (json!({ "amount": "10.001" }), "invalid_amount"),
        (json!({ "amount": "lots" }), "invalid_request"),
        (json!({}), "invalid_request"),
    ];

    for (body, code) in cases {
        let (status, response) = send(&app.router, post("/balance/add", Some(1), body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(response["error_code"], code, "body {body}");
    }

    assert!(app.ledger.store().records_for(1).is_empty());
}

#[tokio::test]
async fn test_transfer_errors() {
    let app = common::memory_app();
    open(&app.router, 1).await;

    let (status, body) = send(
        &app.router,
        post("/balance/transfer/1", Some(1), json!({ "amount": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "same_account");

    let (status, body) = send(
        &app.router,
        post("/balance/transfer/99", Some(1), json!({ "amount": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "account_not_found");

    let (status, _) = send(
        &app.router,
        post("/balance/transfer/abc", Some(1), json!({ "amount": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transactions_pagination() {
    let app = common::memory_app();
    open(&app.router, 1).await;
    for amount in [10, 20, 30, 40, 50] {
        let (status, _) = send(&app.router, post("/balance/add", Some(1), json!({ "amount": amount }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app.router, get("/balance/transactions?limit=2&page=2", Some(1))).await;
    assert_eq!(status, StatusCode::OK);

    let amounts: Vec<Decimal> = body["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| decimal(&t["amount"]))
        .collect();
    assert_eq!(amounts, vec![Decimal::from(30), Decimal::from(20)]);

    let pagination = &body["pagination"];
    assert_eq!(pagination["limit"], 2);
    assert_eq!(pagination["offset"], 2);
    assert_eq!(pagination["page_info"]["current_page"], 2);
    assert_eq!(pagination["page_info"]["total_count"], 5);
    assert_eq!(pagination["page_info"]["total_count_page"], 3);

    // Defaults and clamping
    let (_, body) = send(&app.router, get("/balance/transactions", Some(1))).await;
    assert_eq!(body["pagination"]["limit"], 10);
    assert_eq!(body["transactions"].as_array().unwrap().len(), 5);

    let (_, body) = send(&app.router, get("/balance/transactions?limit=0&page=-3", Some(1))).await;
    assert_eq!(body["pagination"]["limit"], 1);
    assert_eq!(body["pagination"]["page_info"]["current_page"], 1);
}

#[tokio::test]
async fn test_reset_is_queued() {
    let app = common::memory_app();
    open(&app.router, 1).await;
    open(&app.router, 2).await;
    send(&app.router, post("/balance/add", Some(1), json!({ "amount": 70 }))).await;
    send(&app.router, post("/balance/add", Some(2), json!({ "amount": 30 }))).await;

    let (status, body) = send(&app.router, post("/balance/reset-all-to-zero", Some(1), json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // Nothing changes until the worker runs
    assert_eq!(app.ledger.store().total_balance(), Decimal::from(100));

    let worker = ResetWorker::new(app.ledger.clone(), app.queue.clone(), WorkerConfig::default());
    worker.run_once().await.unwrap().unwrap();
    assert_eq!(app.ledger.store().total_balance(), Decimal::ZERO);

    let (status, body) = send(&app.router, get(&format!("/balance/jobs/{job_id}"), Some(1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["kind"], "resetAllUsersBalance");
    assert_eq!(body["attempts"], 1);

    let (status, _) = send(
        &app.router,
        get("/balance/jobs/00000000-0000-0000-0000-000000000000", Some(1)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_account_lifecycle() {
    let app = common::memory_app();
    open(&app.router, 5).await;

    let request = with_service_key(post("/accounts", None, json!({ "id": 5 })), common::SERVICE_KEY);
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "account_exists");

    send(&app.router, post("/balance/add", Some(5), json!({ "amount": 15 }))).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/accounts/5")
        .header("X-API-Key", common::SERVICE_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["account_id"], 5);
    assert_eq!(body["transactions_deleted"], 1);

    let (status, _) = send(&app.router, get("/balance", Some(5))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_account_routes_require_service_key() {
    let app = common::memory_app();
    open(&app.router, 5).await;
    send(&app.router, post("/balance/add", Some(5), json!({ "amount": 100 }))).await;

    let close = || {
        Request::builder()
            .method("DELETE")
            .uri("/accounts/5")
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app.router, close()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "missing_header");

    let (status, body) = send(&app.router, with_service_key(close(), "guessed-key")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "invalid_api_key");

    let (status, _) = send(&app.router, post("/accounts", Some(5), json!({ "id": 6 }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Nothing was closed or opened
    let (_, body) = send(&app.router, get("/balance", Some(5))).await;
    assert_eq!(decimal(&body["balance"]), Decimal::from(100));
    assert_eq!(app.ledger.store().records_for(5).len(), 1);
    let (status, _) = send(&app.router, get("/balance", Some(6))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
