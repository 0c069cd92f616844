use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use tiergate::http::{admission_middleware, router, AppState, BypassList, CHECK_PATH, STATUS_PATH};
use tiergate::ratelimit::{AdmissionEngine, LimitTable, ManualClock, Tier, DEFAULT_PATTERN};

fn engine(limit: u64) -> (Arc<AdmissionEngine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let mut limits = LimitTable::new();
    limits.insert_tier(Tier::Free, [(DEFAULT_PATTERN, limit)]);
    let engine = AdmissionEngine::builder()
        .limits(limits)
        .clock(clock.clone())
        .build();
    (Arc::new(engine), clock)
}

fn service(limit: u64) -> (Router, Arc<ManualClock>) {
    let (engine, clock) = engine(limit);
    let bypass = BypassList::new(["/health", "/docs", "/openapi.json", STATUS_PATH]);
    (router(engine, bypass), clock)
}

fn get_from(path: &str, client: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_allowed_response_carries_quota_headers() {
    let (app, _) = service(3);

    let response = app.oneshot(get_from("/api/data", "203.0.113.5")).await.unwrap();

    // Passes admission, then falls through to the 404 handler
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let headers = response.headers();
    assert_eq!(headers["x-ratelimit-limit"], "3");
    assert_eq!(headers["x-ratelimit-remaining"], "2");
    assert_eq!(headers["x-ratelimit-reset"], "2024-01-01T01:00:00Z");
    assert_eq!(headers["x-ratelimit-tier"], "free");
}

#[tokio::test]
async fn test_rejection_after_ceiling() {
    let (app, _) = service(2);

    for _ in 0..2 {
        let response = app.clone().oneshot(get_from("/api/data", "203.0.113.5")).await.unwrap();
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let response = app.clone().oneshot(get_from("/api/data", "203.0.113.5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "3600");

    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(body["limit"], 2);
    assert_eq!(body["tier"], "free");
    assert_eq!(body["retry_after"], "2024-01-01T01:00:00Z");
    assert_eq!(
        body["message"],
        "You have exceeded the rate limit of 2 requests per hour."
    );

    // A different client is unaffected
    let response = app.oneshot(get_from("/api/data", "203.0.113.6")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_window_expiry_over_http() {
    let (app, clock) = service(1);

    app.clone().oneshot(get_from("/x", "203.0.113.5")).await.unwrap();
    let denied = app.clone().oneshot(get_from("/x", "203.0.113.5")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::minutes(61));
    let allowed = app.oneshot(get_from("/x", "203.0.113.5")).await.unwrap();
    assert_eq!(allowed.status(), StatusCode::NOT_FOUND);
    assert_eq!(allowed.headers()["x-ratelimit-remaining"], "0");
}

#[tokio::test]
async fn test_bypassed_paths_are_never_limited() {
    let (app, _) = service(0);

    for _ in 0..5 {
        let response = app.clone().oneshot(get_from("/health", "203.0.113.5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    let response = app.oneshot(get_from("/anything", "203.0.113.5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_status_query_does_not_consume() {
    let (app, _) = service(5);

    app.clone().oneshot(get_from("/api/data", "203.0.113.5")).await.unwrap();

    let uri = format!("{}?path=/api/data", STATUS_PATH);
    for _ in 0..3 {
        let response = app.clone().oneshot(get_from(&uri, "203.0.113.5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rate_limiting"], true);
        assert_eq!(body["status"]["tier"], "free");
        assert_eq!(body["status"]["limit"], 5);
        assert_eq!(body["status"]["used"], 1);
        assert_eq!(body["status"]["remaining"], 4);
    }
}

#[tokio::test]
async fn test_check_endpoint() {
    let (app, _) = service(1);
    let request = || {
        Request::builder()
            .method("POST")
            .uri(CHECK_PATH)
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"peer_addr": "198.51.100.1", "path": "/api/data"}"#,
            ))
            .unwrap()
    };

    let response = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["allowed"], true);
    assert_eq!(body["remaining"], 0);

    let response = app.oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["allowed"], false);
    assert_eq!(body["limit"], 1);
}

#[tokio::test]
async fn test_rejected_requests_never_reach_handler() {
    let (engine, _) = engine(2);
    let hits = Arc::new(AtomicUsize::new(0));
    let state = AppState::new(engine, BypassList::default());

    let counter = hits.clone();
    let app = Router::new()
        .route(
            "/api/data",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        )
        .layer(from_fn_with_state(state, admission_middleware::<AdmissionEngine>));

    for _ in 0..5 {
        app.clone().oneshot(get_from("/api/data", "203.0.113.5")).await.unwrap();
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
