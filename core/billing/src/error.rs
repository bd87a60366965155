use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Payment provider error: {0:#}")]
    Provider(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type BillingResult<T> = std::result::Result<T, BillingError>;

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = match &self {
            BillingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BillingError::InvalidSignature | BillingError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BillingError::Provider(_) | BillingError::Storage(_) => {
                error!("{}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
