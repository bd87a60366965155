use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use knowledge_forge_indexing::KnowledgeIndex;
use knowledge_forge_schemas::ChatRequest;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::composer::Composer;

#[derive(Clone)]
pub struct AppState {
    pub composer: Arc<Composer<KnowledgeIndex>>,
}

pub fn router(state: AppState) -> Router {
    // CORS layer for the browser UI
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/chat-rag", post(chat_rag))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "composer",
        "status": "healthy",
        "version": "0.1.0"
    }))
}

async fn chat_rag(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if request.user_id.trim().is_empty() || request.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "message and userId are required".to_string(),
        ));
    }

    let response = state
        .composer
        .chat(&request.user_id, &request.message)
        .await
        .map_err(|e| {
            error!("Failed to answer chat request: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(response))
}
