use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use medrelay_api::ApiConfig;
use medrelay_core::{Frame, Metadata, MessageId};
use medrelay_infra::{FeedbackStore, FeedbackStoreError, InMemoryFeedbackStore, InMemoryMemoryStore};
use medrelay_queue::RetryPolicy;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Requests the fake backend received, in arrival order.
type Seen = Arc<Mutex<Vec<Value>>>;

/// Deterministic embedding: questions about dosing and about side effects
/// land on different axes.
fn fake_embedding(input: &str) -> Vec<f32> {
    if input.contains("dose") {
        vec![1.0, 0.05, 0.0]
    } else if input.contains("side effect") {
        vec![0.0, 1.0, 0.0]
    } else {
        vec![0.0, 0.0, 1.0]
    }
}

/// Fake chat, analysis and OpenAI-compatible backend.
fn backend_app(seen: Seen) -> Router {
    Router::new()
        .route(
            "/v1/embeddings",
            post(|Json(body): Json<Value>| async move {
                let input = body["input"].as_str().unwrap_or_default();
                if input.contains("fail") {
                    return (StatusCode::INTERNAL_SERVER_ERROR, "model overloaded").into_response();
                }
                Json(json!({ "data": [{ "embedding": fake_embedding(input) }] })).into_response()
            }),
        )
        .route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let prompt = body["messages"][1]["content"].as_str().unwrap_or_default();
                let content = if prompt.contains("dose") {
                    json!("Question about dosing")
                } else {
                    Value::Null
                };
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": content } }]
                }))
            }),
        )
        .route(
            "/api/chat/stream",
            post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                let query = body["query"].as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().push(body);
                if query == "explode" {
                    return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
                }
                let text = format!(
                    "data: {{\"status\":\"streaming\",\"content\":\"Echo: \"}}\n\n\
                     data: {{\"status\":\"streaming\",\"content\":\"{query}\"}}\n\n\
                     data: {{\"status\":\"complete\",\"response\":\"Echo: {query}\",\"title\":\"Echo\"}}\n\n"
                );
                ([("content-type", "text/event-stream")], text).into_response()
            }),
        )
        .route(
            "/api/calculator",
            post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                let image = body["image"].as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().push(body);
                if image == "corrupt" {
                    return (StatusCode::UNPROCESSABLE_ENTITY, "cannot decode image").into_response();
                }
                Json(json!({ "dose": "5 ml", "confidence": 0.9 })).into_response()
            }),
        )
        .route("/api/health", get(|| async { Json(json!({ "status": "healthy" })) }))
        .with_state(seen)
}

struct Harness {
    api: TestServer,
    _backend: Option<TestServer>,
    seen: Seen,
    store: Arc<InMemoryFeedbackStore>,
    memory: Arc<InMemoryMemoryStore>,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let seen: Seen = Arc::default();
        let backend = TestServer::spawn(backend_app(seen.clone())).await;
        let base = backend.base_url.clone();
        Self::with_backend(base, Some(backend), seen).await
    }

    /// API pointed at a port nothing listens on.
    async fn without_backend() -> Self {
        let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", unused.local_addr().unwrap());
        drop(unused);
        Self::with_backend(base, None, Arc::default()).await
    }

    async fn with_backend(base: String, backend: Option<TestServer>, seen: Seen) -> Self {
        medrelay_observability::tracing::init_for_tests();
        let store = Arc::new(InMemoryFeedbackStore::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let config = ApiConfig::default()
            .with_chat_backend(base.clone())
            .with_analysis_backend(base.clone())
            .with_memory_api(format!("{base}/v1"))
            .with_upstream_timeout(Duration::from_secs(10))
            .with_feedback_retry(RetryPolicy::fixed(3, Duration::from_millis(10)));

        let app =
            medrelay_api::app::build_app_with_stores(config, store.clone(), memory.clone()).unwrap();
        Self {
            api: TestServer::spawn(app).await,
            _backend: backend,
            seen,
            store,
            memory,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api.base_url, path)
    }

    async fn chat(&self, body: Value) -> (reqwest::StatusCode, HeaderMap, Vec<Frame>) {
        let res = self.client.post(self.url("/api/chat")).json(&body).send().await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();

        // `text()` only resolves once the downstream body has been closed.
        let text = tokio::time::timeout(Duration::from_secs(5), res.text())
            .await
            .expect("chat stream was left open")
            .unwrap();
        (status, headers, parse_frames(&text))
    }

    async fn remember(&self, body: Value) -> (StatusCode, Value) {
        let res = self.client.post(self.url("/api/memory")).json(&body).send().await.unwrap();
        let status = StatusCode::from_u16(res.status().as_u16()).unwrap();
        (status, res.json().await.unwrap())
    }

    async fn recall(&self, query: Option<&str>) -> (StatusCode, Value) {
        let mut req = self.client.get(self.url("/api/memory"));
        if let Some(query) = query {
            req = req.query(&[("query", query)]);
        }
        let res = req.send().await.unwrap();
        let status = StatusCode::from_u16(res.status().as_u16()).unwrap();
        (status, res.json().await.unwrap())
    }

    async fn post_feedback(&self, body: Value) -> (StatusCode, Value) {
        let res = self.client.post(self.url("/api/feedback")).json(&body).send().await.unwrap();
        let status = StatusCode::from_u16(res.status().as_u16()).unwrap();
        (status, res.json().await.unwrap())
    }
}

fn parse_frames(body: &str) -> Vec<Frame> {
    body.split("\n\n")
        .filter(|block| !block.is_empty())
        .map(|block| {
            let json = block.strip_prefix("data: ").expect("frame must start with data: ");
            serde_json::from_str(json).expect("frame must be valid JSON")
        })
        .collect()
}

fn feedback_body(id: &str, vote: i16) -> Value {
    json!({
        "messageId": id,
        "feedback": vote,
        "messageContent": "Take with food.",
        "timestamp": "2026-10-19T08:30:00Z"
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// System
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::start().await;
    let res = reqwest::get(h.url("/health")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_relays_backend_frames_and_default_persona() {
    let h = Harness::start().await;

    let (status, headers, frames) = h.chat(json!({ "query": "ibuprofen" })).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(
        frames,
        vec![
            Frame::streaming("Echo: "),
            Frame::streaming("ibuprofen"),
            Frame::complete(
                "Echo: ibuprofen",
                Metadata {
                    title: Some("Echo".into()),
                    ..Metadata::default()
                }
            ),
        ]
    );

    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![json!({ "query": "ibuprofen", "persona": "general_med" })]);
}

#[tokio::test]
async fn chat_forwards_requested_persona() {
    let h = Harness::start().await;
    let (_, _, frames) = h.chat(json!({ "query": "q", "persona": "pharmacist" })).await;

    assert_eq!(frames.len(), 3);
    assert_eq!(h.seen.lock().unwrap()[0]["persona"], "pharmacist");
}

#[tokio::test]
async fn chat_backend_failure_is_one_error_frame() {
    let h = Harness::start().await;
    let (_, headers, frames) = h.chat(json!({ "query": "explode" })).await;

    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        Frame::Error { message } => assert!(message.contains("500"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_query_is_rejected_in_band() {
    let h = Harness::start().await;

    for body in [json!({}), json!({ "query": "" }), json!({ "query": "   " })] {
        let (_, _, frames) = h.chat(body).await;
        assert_eq!(frames, vec![Frame::error("No query provided")]);
    }
    assert!(h.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_chat_backend_is_an_error_frame() {
    let h = Harness::without_backend().await;
    let (_, _, frames) = h.chat(json!({ "query": "hello" })).await;

    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], Frame::Error { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Feedback
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn feedback_is_stored_and_resubmission_updates_the_vote() {
    let h = Harness::start().await;

    let (status, body) = h.post_feedback(feedback_body("m-1", 1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Feedback stored successfully");
    assert_eq!(body["data"]["feedback"], 1);
    let id = body["data"]["id"].clone();

    let (status, body) = h.post_feedback(feedback_body("m-1", 0)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["feedback"], 0);

    assert_eq!(h.store.len(), 1);
    let stored = h.store.get(&MessageId::new("m-1")).await.unwrap().unwrap();
    assert_eq!(stored.feedback, 0);
}

#[tokio::test]
async fn malformed_feedback_is_a_bad_request() {
    let h = Harness::start().await;

    for body in [
        json!({ "feedback": 1 }),
        json!({ "messageId": "m-1", "feedback": 5 }),
        json!({ "messageId": "", "feedback": 1 }),
        json!("not an object"),
    ] {
        let (status, body) = h.post_feedback(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "status": "error", "message": "Invalid request body" }));
    }
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn duplicate_key_maps_to_409_without_retry() {
    let h = Harness::start().await;
    h.store.fail_next(FeedbackStoreError::from_code("23505", "duplicate key"));

    let (status, body) = h.post_feedback(feedback_body("m-2", 1)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body,
        json!({ "status": "error", "message": "Duplicate message ID", "code": "23505" })
    );
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn persistent_timeouts_exhaust_retries_and_map_to_504() {
    let h = Harness::start().await;
    for _ in 0..3 {
        h.store.fail_next(FeedbackStoreError::from_code("ETIMEDOUT", "slow"));
    }

    let (status, body) = h.post_feedback(feedback_body("m-3", 1)).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["message"], "Database connection timed out");
    assert_eq!(body["code"], "ETIMEDOUT");
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn transient_refusal_is_retried_transparently() {
    let h = Harness::start().await;
    h.store.fail_next(FeedbackStoreError::from_code("ECONNREFUSED", "down"));

    let (status, body) = h.post_feedback(feedback_body("m-4", 1)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(h.store.len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Calculator
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn calculator_passes_backend_json_through() {
    let h = Harness::start().await;

    let res = h
        .client
        .post(h.url("/api/calculator"))
        .json(&json!({ "image": "aGVsbG8=" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "dose": "5 ml", "confidence": 0.9 }));
    assert_eq!(h.seen.lock().unwrap()[0], json!({ "image": "aGVsbG8=" }));
}

#[tokio::test]
async fn calculator_backend_error_is_reported_with_details() {
    let h = Harness::start().await;

    let res = h
        .client
        .post(h.url("/api/calculator"))
        .json(&json!({ "image": "corrupt" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Failed to analyze image");
    assert_eq!(body["details"], "Backend error: 422 cannot decode image");
}

#[tokio::test]
async fn calculator_accepts_large_images() {
    let h = Harness::start().await;
    let image = "A".repeat(4 * 1024 * 1024);

    let res = h
        .client
        .post(h.url("/api/calculator"))
        .json(&json!({ "image": image }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn calculator_status_reports_backend_health() {
    let h = Harness::start().await;
    let body: Value = reqwest::get(h.url("/api/calculator")).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn calculator_status_is_503_when_backend_is_down() {
    let h = Harness::without_backend().await;
    let res = reqwest::get(h.url("/api/calculator")).await.unwrap();

    assert_eq!(res.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "status": "error", "message": "Backend server is not available" })
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Question memory
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn remembered_questions_are_found_by_similarity() {
    let h = Harness::start().await;

    let (status, body) = h.remember(json!({ "question": "What dose of ibuprofen for adults?" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "success",
            "summary": "Question about dosing",
            "message": "Memory stored successfully"
        })
    );

    // No summary from the model: the question stands in for it.
    let (status, body) = h.remember(json!({ "question": "Any side effects of ibuprofen?" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "Any side effects of ibuprofen?");
    assert_eq!(h.memory.len(), 2);

    let (status, body) = h.recall(Some("ibuprofen dose for a child")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let memories = body["memories"].as_array().unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0]["question"], "What dose of ibuprofen for adults?");
    assert_eq!(memories[0]["question_summary"], "Question about dosing");
    assert!(memories[0]["similarity"].as_f64().unwrap() > 0.8);
    assert!(memories[0]["id"].is_string());
    assert!(memories[0]["timestamp"].is_string());
}

#[tokio::test]
async fn unrelated_query_finds_no_memories() {
    let h = Harness::start().await;
    h.remember(json!({ "question": "What dose of ibuprofen for adults?" })).await;

    let (status, body) = h.recall(Some("where is the pharmacy")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "success", "memories": [] }));
}

#[tokio::test]
async fn memory_requires_question_and_query() {
    let h = Harness::start().await;

    for body in [json!({}), json!({ "question": "  " }), json!({ "question": 5 })] {
        let (status, res) = h.remember(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(res, json!({ "status": "error", "message": "Question is required" }));
    }

    let (status, res) = h.recall(None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(res, json!({ "status": "error", "message": "Query parameter is required" }));
    assert!(h.memory.is_empty());
}

#[tokio::test]
async fn analysis_failure_is_a_server_error() {
    let h = Harness::start().await;

    let (status, res) = h.remember(json!({ "question": "this will fail" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res, json!({ "status": "error", "message": "Failed to store memory" }));
    assert!(h.memory.is_empty());

    let (status, res) = h.recall(Some("fail again")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res, json!({ "status": "error", "message": "Failed to retrieve memories" }));
}
