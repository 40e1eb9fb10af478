//! Postal lookup against local mock providers

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mdm_common::{Domain, Operation, RawRecord};
use mdm_hub::config::{InferenceConfig, MatchingConfig, PipelineConfig, PostalConfig};
use mdm_hub::normalizer::FieldNormalizer;
use mdm_hub::pipeline::{BatchPolicies, BatchRequest, PipelineCoordinator};
use mdm_hub::services::PostalLookup;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct Hits {
    viacep: Arc<AtomicUsize>,
    zipcodebase: Arc<AtomicUsize>,
}

async fn viacep(State(hits): State<Hits>, Path(cep): Path<String>) -> Json<Value> {
    hits.viacep.fetch_add(1, Ordering::SeqCst);
    // slow enough for concurrent lookups to overlap
    tokio::time::sleep(Duration::from_millis(100)).await;
    if cep == "01310100" {
        Json(json!({
            "cep": "01310-100",
            "logradouro": "Avenida Paulista",
            "bairro": "Bela Vista",
            "localidade": "São Paulo",
            "uf": "SP"
        }))
    } else {
        Json(json!({ "erro": true }))
    }
}

/// First call is rate limited, later calls answer; `US` codes are refused
async fn zipcodebase(State(hits): State<Hits>, Query(query): Query<HashMap<String, String>>) -> Response {
    let call = hits.zipcodebase.fetch_add(1, Ordering::SeqCst);
    if query.get("country").map(String::as_str) == Some("US") {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    if call == 0 {
        return (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")], "slow down").into_response();
    }
    let code = query.get("codes").cloned().unwrap_or_default();
    let mut results = serde_json::Map::new();
    results.insert(
        code.clone(),
        json!([{
            "postal_code": "20040-002",
            "city": "Rio de Janeiro",
            "state": "Rio de Janeiro",
            "state_code": "RJ",
            "district": "Centro"
        }]),
    );
    Json(json!({
        "query": { "codes": [code], "country": "BR" },
        "results": results
    }))
    .into_response()
}

async fn spawn_providers() -> (String, Hits) {
    let hits = Hits::default();
    let app = Router::new()
        .route("/ws/:cep/json/", get(viacep))
        .route("/api/v1/search", get(zipcodebase))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn config(base: &str, zipcodebase_key: Option<&str>) -> PostalConfig {
    PostalConfig {
        enabled: true,
        zipcodebase_key: zipcodebase_key.map(str::to_string),
        zipcodebase_url: format!("{}/api/v1/search", base),
        viacep_url: base.to_string(),
        requests_per_second: 100,
        base_delay_ms: 1,
        ..PostalConfig::default()
    }
}

#[tokio::test]
async fn test_viacep_lookup() {
    let (base, hits) = spawn_providers().await;
    let lookup = PostalLookup::new(&config(&base, None)).unwrap();

    let info = lookup.lookup("01310-100", Some("BR")).await.unwrap();

    assert_eq!(info.postal_code, "01310-100");
    assert_eq!(info.city.as_deref(), Some("São Paulo"));
    assert_eq!(info.neighborhood.as_deref(), Some("Bela Vista"));
    assert_eq!(info.state.as_deref(), Some("SP"));
    assert_eq!(info.provider, "viacep");
    assert_eq!(hits.zipcodebase.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_code_is_a_miss_and_not_cached() {
    let (base, hits) = spawn_providers().await;
    let lookup = PostalLookup::new(&config(&base, None)).unwrap();

    assert!(lookup.lookup("99999-999", None).await.is_none());
    assert_eq!(lookup.cached(), 0);

    // a miss is retried by the next lookup
    assert!(lookup.lookup("99999999", None).await.is_none());
    assert_eq!(hits.viacep.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_request() {
    let (base, hits) = spawn_providers().await;
    let lookup = PostalLookup::new(&config(&base, None)).unwrap();

    let results = futures::future::join_all((0..5).map(|_| lookup.lookup("01310100", Some("BR")))).await;

    assert!(results.iter().all(|r| r.as_ref().map(|i| i.city.as_deref()) == Some(Some("São Paulo"))));
    assert_eq!(hits.viacep.load(Ordering::SeqCst), 1);

    // cached afterwards
    assert!(lookup.lookup("01310-100", None).await.is_some());
    assert_eq!(hits.viacep.load(Ordering::SeqCst), 1);
    assert_eq!(lookup.cached(), 1);
}

#[tokio::test]
async fn test_zipcodebase_honours_retry_after() {
    let (base, hits) = spawn_providers().await;
    let lookup = PostalLookup::new(&config(&base, Some("test-key"))).unwrap();

    let info = lookup.lookup("20040002", Some("BR")).await.unwrap();

    assert_eq!(info.provider, "zipcodebase");
    assert_eq!(info.city.as_deref(), Some("Rio de Janeiro"));
    assert_eq!(info.state.as_deref(), Some("RJ"));
    assert_eq!(info.neighborhood.as_deref(), Some("Centro"));
    assert_eq!(hits.zipcodebase.load(Ordering::SeqCst), 2);
    assert_eq!(hits.viacep.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (base, hits) = spawn_providers().await;
    let lookup = PostalLookup::new(&config(&base, Some("bad-key"))).unwrap();

    assert!(lookup.lookup("10001", Some("US")).await.is_none());
    assert_eq!(hits.zipcodebase.load(Ordering::SeqCst), 1);
    // ViaCEP only serves Brazilian codes
    assert_eq!(hits.viacep.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_enrich_stage_fills_parsed_locality() {
    let (base, _hits) = spawn_providers().await;
    let coordinator = PipelineCoordinator::new(
        FieldNormalizer::rules_only(&InferenceConfig::default()),
        MatchingConfig::default(),
        PipelineConfig::default(),
        Some(PostalLookup::new(&config(&base, None)).unwrap()),
    );
    let request = BatchRequest {
        domain: Domain::Customer,
        operations: vec![Operation::Enrich],
        policies: BatchPolicies::default(),
        records: vec![
            RawRecord::default().with("name", "Ana Lima").with("cep", "01310100"),
            RawRecord::default().with("name", "Bruno Costa"),
        ],
    };

    let response = coordinator.process(request).await.unwrap();

    assert_eq!(response.enrichment.len(), 1);
    assert_eq!(response.enrichment[0].index, 0);
    assert_eq!(response.enrichment[0].city.as_deref(), Some("São Paulo"));

    let parsed = response.record_clean[0].parsed.as_ref().unwrap();
    assert_eq!(parsed.city.as_deref(), Some("São Paulo"));
    assert_eq!(parsed.postal_code.as_deref(), Some("01310-100"));
    assert!(response.record_clean[1].parsed.is_none());
}
