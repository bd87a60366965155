use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use knowledge_forge_schemas::{
    BrainstormRequest, BrainstormResponse, DeleteKnowledgeRequest, ProcessKnowledgeRequest,
    ProcessKnowledgeResponse, ScopeId, SuccessResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::brainstorm::{BrainstormSeed, BRAINSTORM_ENTRY_LIMIT, EMPTY_KNOWLEDGE_MESSAGE};
use crate::database::{KnowledgeStore, NewEntry};
use crate::pipeline::KnowledgePipeline;

const DEFAULT_ENTRY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<KnowledgeStore>>,
    pub pipeline: Arc<KnowledgePipeline>,
}

impl AppState {
    pub fn new(store: KnowledgeStore, pipeline: KnowledgePipeline) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/process-knowledge",
            post(process_knowledge).delete(delete_knowledge),
        )
        .route("/generate-brainstorming", post(generate_brainstorming))
        // Dashboard reads
        .route("/knowledge/scopes", get(list_scopes))
        .route("/knowledge/entries", get(list_entries))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "ingestion",
        "status": "healthy",
        "version": "0.1.0"
    }))
}

fn internal_error(context: &str, e: anyhow::Error) -> (StatusCode, String) {
    error!("{}: {:#}", context, e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn require_user(user_id: &str) -> Result<(), (StatusCode, String)> {
    if user_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "userId is required".to_string()));
    }
    Ok(())
}

async fn process_knowledge(
    State(state): State<AppState>,
    Json(req): Json<ProcessKnowledgeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_user(&req.user_id)?;
    if req.content.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "content is required".to_string()));
    }

    info!(
        "Processing knowledge for user {} ({} chars)",
        req.user_id,
        req.content.chars().count()
    );

    let processed = state
        .pipeline
        .process(&req.content, req.title.as_deref())
        .await
        .map_err(|e| internal_error("Failed to process knowledge", e))?;

    let stored = {
        let mut store = state.store.lock().await;
        store
            .store(NewEntry {
                user_id: &req.user_id,
                title: &processed.title,
                content: &req.content,
                source_url: req.source_url.as_deref(),
                scope: &processed.scope,
                insights: &processed.insights,
                chunks: &processed.chunks,
            })
            .map_err(|e| internal_error("Failed to store knowledge", e))?
    };

    let brainstorming = if req.generate_brainstorming {
        let seed = BrainstormSeed {
            title: stored.entry.title.clone(),
            scope_name: stored.scope.name.clone(),
            summary: stored.entry.processed_content.summary.clone(),
        };
        // The entry is already committed, so a failure here must not fail the request
        match state.pipeline.brainstormer().generate(&[seed]).await {
            Ok(ideas) => Some(ideas),
            Err(e) => {
                warn!("Brainstorming failed for entry {}: {:#}", stored.entry.id, e);
                Some(Vec::new())
            }
        }
    } else {
        None
    };

    Ok(Json(ProcessKnowledgeResponse {
        success: true,
        entry_id: stored.entry.id,
        scope_name: stored.scope.name,
        insights: stored.entry.processed_content,
        brainstorming,
    }))
}

async fn delete_knowledge(
    State(state): State<AppState>,
    Json(req): Json<DeleteKnowledgeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_user(&req.user_id)?;

    let store = state.store.lock().await;
    let deleted = store
        .delete_entry(&req.user_id, &req.entry_id)
        .map_err(|e| internal_error("Failed to delete knowledge", e))?;

    if !deleted {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Entry {} not found", req.entry_id),
        ));
    }

    info!("Deleted entry {} for user {}", req.entry_id, req.user_id);
    Ok(Json(SuccessResponse { success: true }))
}

async fn generate_brainstorming(
    State(state): State<AppState>,
    Json(req): Json<BrainstormRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_user(&req.user_id)?;

    let seeds = {
        let store = state.store.lock().await;
        store
            .brainstorm_seeds(&req.user_id, BRAINSTORM_ENTRY_LIMIT)
            .map_err(|e| internal_error("Failed to load entries", e))?
    };

    if seeds.is_empty() {
        return Ok(Json(BrainstormResponse {
            ideas: Vec::new(),
            message: Some(EMPTY_KNOWLEDGE_MESSAGE.to_string()),
        }));
    }

    let ideas = state
        .pipeline
        .brainstormer()
        .generate(&seeds)
        .await
        .map_err(|e| internal_error("Failed to generate brainstorming", e))?;

    Ok(Json(BrainstormResponse {
        ideas,
        message: None,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: String,
}

async fn list_scopes(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_user(&params.user_id)?;

    let store = state.store.lock().await;
    let scopes = store
        .list_scopes(&params.user_id)
        .map_err(|e| internal_error("Failed to list scopes", e))?;

    Ok(Json(scopes))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntriesQuery {
    user_id: String,
    scope_id: Option<String>,
    limit: Option<usize>,
}

async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<EntriesQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_user(&params.user_id)?;

    let scope_id = params.scope_id.map(ScopeId);
    let limit = params.limit.unwrap_or(DEFAULT_ENTRY_LIMIT);

    let store = state.store.lock().await;
    let entries = store
        .list_entries(&params.user_id, scope_id.as_ref(), limit)
        .map_err(|e| internal_error("Failed to list entries", e))?;

    Ok(Json(entries))
}
