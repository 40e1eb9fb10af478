//! Local axum server speaking the Ollama generate/tags protocol

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
struct MockState {
    hits: Arc<AtomicUsize>,
    status: StatusCode,
    reply: Arc<String>,
}

/// Handle to a running mock server
pub struct MockOllama {
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl MockOllama {
    /// `/api/generate` calls received
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn generate(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if state.status != StatusCode::OK {
        return (state.status, "model overloaded").into_response();
    }
    Json(json!({
        "model": body["model"],
        "created_at": "2024-01-01T00:00:00Z",
        "response": state.reply.as_str(),
        "done": true,
    }))
    .into_response()
}

async fn tags() -> Json<Value> {
    Json(json!({ "models": [{ "name": "qwen2.5:7b" }] }))
}

/// Start a mock on an ephemeral port; every generate call answers
/// `status`, with `reply` as the generated text on 200.
pub async fn spawn_mock_ollama(status: StatusCode, reply: &str) -> MockOllama {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = MockState {
        hits: Arc::clone(&hits),
        status,
        reply: Arc::new(reply.to_string()),
    };
    let app = Router::new()
        .route("/api/generate", post(generate))
        .route("/api/tags", get(tags))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockOllama {
        url: format!("http://{}", addr),
        hits,
    }
}
