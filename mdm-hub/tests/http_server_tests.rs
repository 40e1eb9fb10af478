//! HTTP Server & Routing Integration Tests
//!
//! Router exercised in-process through `tower::ServiceExt::oneshot`.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::{echo_model, endpoints, fast_policy, pool_with, ScriptedBackend};
use http_body_util::BodyExt;
use mdm_hub::config::{DispatcherConfig, HubConfig, InferenceConfig};
use mdm_hub::dispatcher::{BackendError, BackendPool, GenerationParams, OperationClass};
use mdm_hub::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(pool: BackendPool) -> axum::Router {
    let state = AppState::with_pool(HubConfig::default(), Arc::new(pool)).unwrap();
    build_router(state)
}

fn healthy_app() -> axum::Router {
    app_with(pool_with(Arc::new(ScriptedBackend::new(echo_model)), 2, 4, 0))
}

fn refusing_backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(|_: &str, _: &str| {
        Err(BackendError::Connect("connection refused".to_string()))
    }))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_module_and_version() {
    let response = healthy_app().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "mdm-hub");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_llm_endpoints_lists_health() {
    let response = healthy_app().oneshot(get("/llm/endpoints")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["endpoint"], "http://gpu-0");
    assert_eq!(list[0]["healthy"], true);
}

#[tokio::test]
async fn test_llm_ping() {
    let response = healthy_app().oneshot(get("/llm/ping")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "endpoint": "http://gpu-0", "status": 200 }));
}

#[tokio::test]
async fn test_llm_ping_unreachable_is_bad_gateway() {
    let app = app_with(pool_with(refusing_backend(), 1, 4, 0));

    let response = app.oneshot(get("/llm/ping")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_GATEWAY");
}

#[tokio::test]
async fn test_process_batch() {
    let request = json!({
        "domain": "customer",
        "operations": ["normalize", "validate", "dedupe"],
        "records": [
            { "source": "CRM", "id": "1", "name": "JOAO DA SILVA", "cpf": "12345678909", "phone": "(11) 98765-4321" },
            { "source": "ERP", "id": "2", "name": "João da Silva", "cpf": "123.456.789-09", "phone": "+55 11 98765-4321" }
        ]
    });

    let response = healthy_app().oneshot(post_json("/mdm/process", &request)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["domain"], "customer");
    assert_eq!(body["record_clean"].as_array().unwrap().len(), 2);
    assert_eq!(body["record_clean"][0]["cpf"], "123.456.789-09");
    assert_eq!(body["golden_record"]["baseline"], 1);
    assert_eq!(body["clusters"].as_array().unwrap().len(), 1);
    assert!(body["audit_log"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn test_empty_batch_is_bad_request() {
    let request = json!({ "domain": "customer", "operations": ["normalize"], "records": [] });

    let response = healthy_app().oneshot(post_json("/mdm/process", &request)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/mdm/process")
        .header("content-type", "application/json")
        .body(Body::from("{ not json"))
        .unwrap();

    let response = healthy_app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exhausted_backend_is_service_unavailable() {
    let dispatcher = DispatcherConfig {
        failure_threshold: 1,
        ..DispatcherConfig::default()
    };
    let pool = BackendPool::new(refusing_backend(), endpoints(1), &dispatcher, fast_policy(0));
    let params = GenerationParams::for_class(&InferenceConfig::default(), OperationClass::Normalize);
    assert!(pool.invoke(OperationClass::Normalize, "Record:\n{}", &params).await.is_err());
    let app = app_with(pool);

    let request = json!({
        "domain": "customer",
        "operations": ["normalize"],
        "records": [{ "name": "Ana Lima" }]
    });
    let response = app.clone().oneshot(post_json("/mdm/process", &request)).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BACKEND_UNAVAILABLE");

    let health = body_json(app.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["status"], "degraded");
}
