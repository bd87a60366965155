use axum::{
    body::Bytes,
    extract::{FromRequestParts, Json, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use knowledge_forge_schemas::CreateSubscriptionRequest;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{bearer_token, Identity, IdentityProvider};
use crate::error::{BillingError, BillingResult};
use crate::paypal::WebhookHeaders;
use crate::subscriptions::SubscriptionManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionManager>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(manager: SubscriptionManager, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            manager: Arc::new(manager),
            identity,
        }
    }
}

/// The caller resolved from the request's bearer token
pub struct AuthenticatedUser(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = BillingError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let identity = state.identity.resolve(token).await?;
        Ok(AuthenticatedUser(identity))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/create-paypal-subscription", post(create_subscription))
        .route("/check-paypal-subscription", post(check_subscription))
        .route("/paypal-webhook", post(paypal_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "billing",
        "status": "healthy",
        "version": "0.1.0"
    }))
}

async fn create_subscription(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(req): Json<CreateSubscriptionRequest>,
) -> BillingResult<impl IntoResponse> {
    let created = state.manager.create(&identity, req.tier).await?;
    Ok(Json(created))
}

async fn check_subscription(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> BillingResult<impl IntoResponse> {
    let status = state.manager.status(&identity).await?;
    Ok(Json(status))
}

async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> BillingResult<impl IntoResponse> {
    let headers = WebhookHeaders::from_headers(&headers);
    state.manager.handle_webhook(&headers, &body).await?;
    Ok((StatusCode::OK, "Webhook processed"))
}
