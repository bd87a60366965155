//! Ingestion API tests against a stubbed model

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use knowledge_forge_indexing::{EmbeddingBackend, GenerationBackend, GenerationRequest, ModelBackends};
use knowledge_forge_ingestion::{router, AppState, KnowledgePipeline, KnowledgeStore};
use knowledge_forge_schemas::EntryId;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const DIMENSION: usize = 4;

/// Deterministic stand-in for the generative model, keyed on prompt shape.
struct StubModel;

#[async_trait]
impl GenerationBackend for StubModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let prompt = request.prompt;
        let reply = if prompt.starts_with("Classify") {
            if prompt.contains("marketing") {
                r#"{"scope": "Marketing & Branding", "confidence": 0.88, "reasoning": "Campaign performance"}"#
            } else {
                r#"{"scope": "Technology & AI", "confidence": 0.7, "reasoning": "Technical"}"#
            }
        } else if prompt.starts_with("Analyze") {
            r#"{"summary": "AI personalization improved retention.", "keyPoints": ["Q3 campaign"], "entities": ["Q3"], "tags": ["marketing", "ai"], "actionableInsights": []}"#
        } else if prompt.starts_with("Here is") {
            r#"[{"title": "Retention experiments", "description": "Run personalization A/B tests.", "relatedScopes": ["Marketing & Branding"]}]"#
        } else {
            "\"AI Personalization for Retention\""
        };
        Ok(reply.to_string())
    }
}

/// Same replies as `StubModel`, but the brainstorming call fails.
struct BrainstormOutage;

#[async_trait]
impl GenerationBackend for BrainstormOutage {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        if request.prompt.starts_with("Here is") {
            anyhow::bail!("503 Service Unavailable");
        }
        StubModel.generate(request).await
    }
}

struct StubEmbeddings;

#[async_trait]
impl EmbeddingBackend for StubEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vec![text.len() as f32, 1.0, 0.0, 0.5])
    }
}

fn setup_test_app() -> (axum::Router, AppState, TempDir) {
    setup_test_app_with(Arc::new(StubModel))
}

fn setup_test_app_with(model: Arc<dyn GenerationBackend>) -> (axum::Router, AppState, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = KnowledgeStore::new(temp_dir.path().join("knowledge.db")).unwrap();

    let backends = ModelBackends {
        generation: Some(model),
        embedding: Some(Arc::new(StubEmbeddings)),
    };
    let state = AppState::new(store, KnowledgePipeline::new(&backends, DIMENSION));

    (router(state.clone()), state, temp_dir)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_marketing_submission_end_to_end() {
    let (app, state, _temp_dir) = setup_test_app();
    let content = "Our Q3 marketing campaign used AI-driven personalization to boost retention.";

    let (status, body) = send(
        &app,
        "POST",
        "/process-knowledge",
        Some(json!({ "content": content, "userId": "user-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["scopeName"], "Marketing & Branding");
    assert_eq!(body["insights"]["keyPoints"], json!(["Q3 campaign"]));
    assert!(body.get("brainstorming").is_none());

    let entry_id = EntryId(body["entryId"].as_str().unwrap().to_string());
    let store = state.store.lock().await;
    assert_eq!(store.count_entries("user-1").unwrap(), 1);

    let entry = store.get_entry("user-1", &entry_id).unwrap().unwrap();
    assert_eq!(entry.title, "AI Personalization for Retention");

    let expected_chunks = (content.chars().count() + 499) / 500;
    let chunks = store.get_chunks(&entry_id).unwrap();
    assert_eq!(chunks.len(), expected_chunks);
    assert!(chunks.iter().all(|c| c.embedding.len() == DIMENSION));
}

#[tokio::test]
async fn test_long_content_gets_one_row_per_chunk() {
    let (app, state, _temp_dir) = setup_test_app();
    let content = "Tokio schedules tasks. ".repeat(60);

    let (status, body) = send(
        &app,
        "POST",
        "/process-knowledge",
        Some(json!({ "content": content, "userId": "user-1", "title": "Tokio notes" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let entry_id = EntryId(body["entryId"].as_str().unwrap().to_string());
    let store = state.store.lock().await;
    let chunks = store.get_chunks(&entry_id).unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks.iter().map(|c| c.content_chunk.as_str()).collect::<String>(), content);
    assert_eq!(store.get_entry("user-1", &entry_id).unwrap().unwrap().title, "Tokio notes");
}

#[tokio::test]
async fn test_repeat_scope_creates_one_scope_row() {
    let (app, _state, _temp_dir) = setup_test_app();

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            "POST",
            "/process-knowledge",
            Some(json!({ "content": "New marketing funnel ideas", "userId": "user-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, scopes) = send(&app, "GET", "/knowledge/scopes?userId=user-1", None).await;
    assert_eq!(status, StatusCode::OK);
    let scopes = scopes.as_array().unwrap();
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0]["name"], "Marketing & Branding");
    assert_eq!(scopes[0]["entry_count"], 2);

    let (_, entries) = send(&app, "GET", "/knowledge/entries?userId=user-1&limit=1", None).await;
    assert_eq!(entries.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_entry() {
    let (app, state, _temp_dir) = setup_test_app();

    let (_, body) = send(
        &app,
        "POST",
        "/process-knowledge",
        Some(json!({ "content": "Rust ownership rules", "userId": "user-1" })),
    )
    .await;
    let entry_id = body["entryId"].clone();

    let (status, _) = send(
        &app,
        "DELETE",
        "/process-knowledge",
        Some(json!({ "entryId": entry_id, "userId": "someone-else" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "DELETE",
        "/process-knowledge",
        Some(json!({ "entryId": entry_id, "userId": "user-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));
    assert_eq!(state.store.lock().await.count_entries("user-1").unwrap(), 0);
}

#[tokio::test]
async fn test_brainstorming() {
    let (app, _state, _temp_dir) = setup_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/generate-brainstorming",
        Some(json!({ "userId": "user-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ideas"], json!([]));
    assert!(body["message"].as_str().unwrap().starts_with("Add some knowledge"));

    let (_, body) = send(
        &app,
        "POST",
        "/process-knowledge",
        Some(json!({
            "content": "Our marketing emails convert poorly",
            "userId": "user-1",
            "generateBrainstorming": true
        })),
    )
    .await;
    assert_eq!(body["brainstorming"][0]["title"], "Retention experiments");

    let (_, body) = send(
        &app,
        "POST",
        "/generate-brainstorming",
        Some(json!({ "userId": "user-1" })),
    )
    .await;
    assert_eq!(body["ideas"][0]["relatedScopes"], json!(["Marketing & Branding"]));
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn test_brainstorming_failure_keeps_stored_entry() {
    let (app, state, _temp_dir) = setup_test_app_with(Arc::new(BrainstormOutage));

    let (status, body) = send(
        &app,
        "POST",
        "/process-knowledge",
        Some(json!({
            "content": "Our marketing emails convert poorly",
            "userId": "user-1",
            "generateBrainstorming": true
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["brainstorming"], json!([]));
    assert_eq!(state.store.lock().await.count_entries("user-1").unwrap(), 1);
}

#[tokio::test]
async fn test_rejects_empty_content() {
    let (app, _state, _temp_dir) = setup_test_app();

    let (status, _) = send(
        &app,
        "POST",
        "/process-knowledge",
        Some(json!({ "content": "   ", "userId": "user-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let (app, _state, _temp_dir) = setup_test_app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "ingestion");
}
