//! End-to-end scenarios from this service's webhook contract, driven
//! directly against the axum `Router` via `tower::ServiceExt::oneshot`
//! rather than a bound TCP listener.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use dex_signal_router::adapters::mock::MockAdapter;
use dex_signal_router::adapters::DexAdapter;
use dex_signal_router::config::Settings;
use dex_signal_router::dedup::Deduplicator;
use dex_signal_router::health::aggregator::HealthAggregator;
use dex_signal_router::rate_limit::RateLimiter;
use dex_signal_router::shutdown::ShutdownCoordinator;
use dex_signal_router::signal_processor::SignalProcessor;
use dex_signal_router::store::Store;
use dex_signal_router::{api, AppState};

const TOKEN: &str = "test-system-token";

fn settings() -> Settings {
    std::env::set_var("WEBHOOK_TOKEN", TOKEN);
    std::env::remove_var("TEST_MODE");
    Settings::from_env().unwrap()
}

async fn state_with_adapters(adapters: Vec<Arc<dyn DexAdapter>>) -> AppState {
    for adapter in &adapters {
        adapter.connect().await.unwrap();
    }
    let store = Store::open(":memory:").unwrap();
    AppState {
        settings: Arc::new(settings()),
        store: store.clone(),
        dedup: Arc::new(Deduplicator::new(60)),
        rate_limiter: Arc::new(RateLimiter::new(60, 10)),
        shutdown: ShutdownCoordinator::new(),
        processor: Arc::new(SignalProcessor::new(adapters.clone(), store.clone(), 30)),
        health_aggregator: Arc::new(HealthAggregator::new(adapters.clone(), false)),
        adapters: Arc::new(adapters),
    }
}

fn webhook_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhook?token={TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn signal_body() -> Value {
    serde_json::json!({"symbol": "ETH-PERP", "side": "buy", "size": "0.5"})
}

#[tokio::test]
async fn s1_happy_path_dispatches_to_every_healthy_adapter() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![
        Arc::new(MockAdapter::new("mock-A")),
        Arc::new(MockAdapter::new("mock-B")),
    ];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state);

    let response = app.oneshot(webhook_request(signal_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    assert_eq!(body["overall_status"], "success");
    assert_eq!(body["successful_count"], 2);
    assert_eq!(body["failed_count"], 0);
    assert_eq!(body["total_dex_count"], 2);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    for result in body["results"].as_array().unwrap() {
        assert!(result["order_id"].is_string());
    }
}

#[tokio::test]
async fn s2_duplicate_within_window_returns_idempotent_echo() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![
        Arc::new(MockAdapter::new("mock-A")),
        Arc::new(MockAdapter::new("mock-B")),
    ];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state.clone());

    let first = app.clone().oneshot(webhook_request(signal_body())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_body = json_body(first).await;
    assert_eq!(first_body["overall_status"], "success");
    assert_eq!(first_body["results"].as_array().unwrap().len(), 2);

    let second = app.oneshot(webhook_request(signal_body())).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = json_body(second).await;
    assert_eq!(second_body["overall_status"], "success");
    assert_eq!(second_body["results"].as_array().unwrap().len(), 0);
    assert_eq!(second_body["total_dex_count"], 0);

    let count = state
        .store
        .count_executions_for_signal(first_body["signal_id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn s4_fourth_distinct_request_within_a_second_is_rate_limited() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![Arc::new(MockAdapter::new("mock-A"))];
    let mut state = state_with_adapters(adapters).await;
    state.rate_limiter = Arc::new(RateLimiter::new(60, 3));
    let app = api::router(state);

    for i in 0..3 {
        let body = serde_json::json!({"symbol": format!("SYM-{i}"), "side": "buy", "size": "1"});
        let response = app.clone().oneshot(webhook_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} should be admitted");
    }

    let fourth = serde_json::json!({"symbol": "SYM-4", "side": "buy", "size": "1"});
    let response = app.oneshot(webhook_request(fourth)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("Retry-After")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
    let body = json_body(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn s5_one_failing_adapter_does_not_affect_the_others() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![
        Arc::new(MockAdapter::new("mock-A")),
        Arc::new(MockAdapter::new_failing("mock-B")),
        Arc::new(MockAdapter::new("mock-C")),
    ];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state);

    let response = app.oneshot(webhook_request(signal_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    assert_eq!(body["overall_status"], "partial");
    assert_eq!(body["successful_count"], 2);
    assert_eq!(body["failed_count"], 1);
    assert_eq!(body["results"].as_array().unwrap().len(), 3);

    let failing = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["dex_id"] == "mock-B")
        .unwrap();
    assert_eq!(failing["status"], "failed");
    assert!(failing["error_message"].is_string());
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![Arc::new(MockAdapter::new("mock-A"))];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook?token=wrong-token")
        .header("content-type", "application/json")
        .body(Body::from(signal_body().to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_signal_body_is_rejected() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![Arc::new(MockAdapter::new("mock-A"))];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state);

    let body = serde_json::json!({"symbol": "", "side": "buy", "size": "1"});
    let response = app.oneshot(webhook_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "INVALID_SIGNAL");
}

#[tokio::test]
async fn s6_shutdown_drains_in_flight_work_and_rejects_new_requests() {
    let adapters: Vec<Arc<dyn DexAdapter>> =
        vec![Arc::new(MockAdapter::new("mock-A").with_submit_delay(300))];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state.clone());

    let in_flight_app = app.clone();
    let handle = tokio::spawn(async move {
        in_flight_app.oneshot(webhook_request(signal_body())).await.unwrap()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    state.shutdown.initiate();

    let rejected = app
        .clone()
        .oneshot(webhook_request(serde_json::json!({
            "symbol": "BTC-PERP", "side": "sell", "size": "1"
        })))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);

    let original = handle.await.unwrap();
    assert_eq!(original.status(), StatusCode::OK);

    assert!(state.shutdown.await_completion(5).await);
}

#[tokio::test]
async fn health_endpoint_reports_composite_status() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![Arc::new(MockAdapter::new("mock-A"))];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["dex_status"]["mock-A"].is_object());
}

#[tokio::test]
async fn liveness_endpoint_reports_service_name() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![Arc::new(MockAdapter::new("mock-A"))];
    let state = state_with_adapters(adapters).await;
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["service"], "dex-signal-router");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_mode_rewrites_response_as_dry_run() {
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![Arc::new(MockAdapter::new("mock-A"))];
    let mut state = state_with_adapters(adapters).await;
    state.settings = Arc::new({
        let mut s = (*state.settings).clone();
        s.test_mode = true;
        s
    });
    let app = api::router(state);

    let response = app.oneshot(webhook_request(signal_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "dry_run");
    assert!(body["would_have_executed"].as_array().unwrap().len() == 1);
}
