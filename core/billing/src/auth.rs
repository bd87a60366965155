use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::{BillingError, BillingResult};

const AUTH_TIMEOUT_SECS: u64 = 10;

/// The caller behind a bearer token
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Identity {
    #[serde(rename = "id")]
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    /// Subscriber rows are keyed by email, so an identity without one cannot subscribe.
    pub fn require_email(&self) -> BillingResult<&str> {
        self.email
            .as_deref()
            .filter(|email| !email.is_empty())
            .ok_or_else(|| BillingError::Unauthorized("account has no email address".to_string()))
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> BillingResult<Identity>;
}

/// Resolves tokens against the hosted auth service's `/auth/v1/user`.
pub struct RemoteIdentityProvider {
    client: Client,
    config: AuthConfig,
}

impl RemoteIdentityProvider {
    pub fn new(config: AuthConfig) -> BillingResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(AUTH_TIMEOUT_SECS))
            .build()
            .map_err(|e| BillingError::Provider(e.into()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl IdentityProvider for RemoteIdentityProvider {
    async fn resolve(&self, token: &str) -> BillingResult<Identity> {
        let url = format!("{}/auth/v1/user", self.config.auth_url.trim_end_matches('/'));

        let mut request = self.client.get(&url).bearer_auth(token);
        if let Some(anon_key) = &self.config.anon_key {
            request = request.header("apikey", anon_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BillingError::Provider(anyhow::Error::new(e).context("Auth request failed")))?;

        match response.status() {
            status if status.is_success() => {
                let identity: Identity = response.json().await.map_err(|e| {
                    BillingError::Provider(anyhow::Error::new(e).context("Unexpected auth response"))
                })?;
                debug!("Resolved bearer token to user {}", identity.user_id);
                Ok(identity)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("Rejected bearer token ({})", response.status());
                Err(BillingError::Unauthorized("invalid or expired token".to_string()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BillingError::Provider(anyhow::anyhow!(
                    "Auth API error {}: {}",
                    status,
                    body
                )))
            }
        }
    }
}

/// Token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> BillingResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| BillingError::Unauthorized("missing Authorization header".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| BillingError::Unauthorized("expected a Bearer token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> RemoteIdentityProvider {
        RemoteIdentityProvider::new(AuthConfig {
            auth_url: server.uri(),
            anon_key: Some("anon".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(BillingError::Unauthorized(_))));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(BillingError::Unauthorized(_))));

        headers.insert(header::AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer eyJhbGci".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "eyJhbGci");
    }

    #[tokio::test]
    async fn test_resolve_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header_eq("authorization", "Bearer good"))
            .and(header_eq("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-1", "email": "ada@example.com", "role": "authenticated"
            })))
            .mount(&server)
            .await;

        let identity = provider(&server).resolve("good").await.unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.require_email().unwrap(), "ada@example.com");
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "msg": "invalid JWT" })))
            .mount(&server)
            .await;

        let result = provider(&server).resolve("expired").await;
        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_identity_without_email() {
        let identity = Identity {
            user_id: "user-1".to_string(),
            email: None,
        };
        assert!(matches!(identity.require_email(), Err(BillingError::Unauthorized(_))));
    }
}
