use anyhow::{anyhow, Context, Result};
use axum::http::HeaderMap;
use knowledge_forge_schemas::SubscriptionTier;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PayPalConfig;

/// Signature headers PayPal attaches to webhook deliveries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

impl WebhookHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        Self {
            auth_algo: get("paypal-auth-algo"),
            cert_url: get("paypal-cert-url"),
            transmission_id: get("paypal-transmission-id"),
            transmission_sig: get("paypal-transmission-sig"),
            transmission_time: get("paypal-transmission-time"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSubscription {
    pub id: String,
    pub approve_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct PlanList {
    #[serde(default)]
    plans: Vec<PlanSummary>,
}

#[derive(Deserialize)]
struct PlanSummary {
    id: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct CreatedResource {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Deserialize)]
struct VerificationResponse {
    verification_status: String,
}

/// PayPal REST client for catalog products, billing plans and subscriptions.
/// Every call is attempted once.
pub struct PayPalClient {
    client: Client,
    config: PayPalConfig,
}

impl PayPalClient {
    pub fn new(config: PayPalConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build PayPal HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn webhook_id(&self) -> Option<&str> {
        self.config.webhook_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    pub async fn access_token(&self) -> Result<String> {
        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("PayPal token request failed")?;

        let token: TokenResponse = error_for_status(response, "token")
            .await?
            .json()
            .await
            .context("Unexpected PayPal token response")?;

        Ok(token.access_token)
    }

    /// Create the catalog product for a tier, or reuse it if it already exists.
    pub async fn ensure_product(&self, token: &str, tier: SubscriptionTier) -> Result<String> {
        let product_id = product_id(tier);

        let response = self
            .client
            .post(self.url("/v1/catalog/products"))
            .bearer_auth(token)
            .json(&json!({
                "id": product_id,
                "name": format!("Knowledge Forge {}", tier.label()),
                "description": format!("Knowledge Forge {} monthly subscription", tier.label()),
                "type": "SERVICE",
                "category": "SOFTWARE",
            }))
            .send()
            .await
            .context("PayPal product request failed")?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            if body.contains("DUPLICATE_RESOURCE_IDENTIFIER") {
                debug!("Reusing existing PayPal product {}", product_id);
                return Ok(product_id);
            }
            return Err(anyhow!("PayPal product API error 422: {}", body));
        }

        let created: CreatedResource = error_for_status(response, "product")
            .await?
            .json()
            .await
            .context("Unexpected PayPal product response")?;

        info!("Created PayPal product {}", created.id);
        Ok(created.id)
    }

    /// Reuse the product's active plan or create a monthly one.
    pub async fn ensure_plan(
        &self,
        token: &str,
        product_id: &str,
        tier: SubscriptionTier,
    ) -> Result<String> {
        let response = self
            .client
            .get(self.url("/v1/billing/plans"))
            .bearer_auth(token)
            .query(&[("product_id", product_id), ("page_size", "20")])
            .send()
            .await
            .context("PayPal plan list request failed")?;

        let existing: PlanList = error_for_status(response, "plan list")
            .await?
            .json()
            .await
            .context("Unexpected PayPal plan list response")?;

        if let Some(plan) = existing.plans.into_iter().find(|p| p.status == "ACTIVE") {
            debug!("Reusing PayPal plan {} for {}", plan.id, product_id);
            return Ok(plan.id);
        }

        let response = self
            .client
            .post(self.url("/v1/billing/plans"))
            .bearer_auth(token)
            .json(&json!({
                "product_id": product_id,
                "name": format!("Knowledge Forge {} Monthly", tier.label()),
                "status": "ACTIVE",
                "billing_cycles": [{
                    "frequency": { "interval_unit": "MONTH", "interval_count": 1 },
                    "tenure_type": "REGULAR",
                    "sequence": 1,
                    "total_cycles": 0,
                    "pricing_scheme": {
                        "fixed_price": { "value": tier.monthly_price(), "currency_code": "USD" }
                    }
                }],
                "payment_preferences": {
                    "auto_bill_outstanding": true,
                    "payment_failure_threshold": 3
                }
            }))
            .send()
            .await
            .context("PayPal plan request failed")?;

        let created: CreatedResource = error_for_status(response, "plan")
            .await?
            .json()
            .await
            .context("Unexpected PayPal plan response")?;

        info!("Created PayPal plan {} for {}", created.id, product_id);
        Ok(created.id)
    }

    pub async fn create_subscription(
        &self,
        token: &str,
        plan_id: &str,
        tier: SubscriptionTier,
        email: &str,
        app_url: &str,
    ) -> Result<CreatedSubscription> {
        let response = self
            .client
            .post(self.url("/v1/billing/subscriptions"))
            .bearer_auth(token)
            .json(&json!({
                "plan_id": plan_id,
                "custom_id": tier.as_str(),
                "subscriber": { "email_address": email },
                "application_context": {
                    "brand_name": "Knowledge Forge",
                    "user_action": "SUBSCRIBE_NOW",
                    "return_url": format!("{}/dashboard?subscription=success", app_url),
                    "cancel_url": format!("{}/pricing?subscription=cancelled", app_url),
                }
            }))
            .send()
            .await
            .context("PayPal subscription request failed")?;

        let created: CreatedResource = error_for_status(response, "subscription")
            .await?
            .json()
            .await
            .context("Unexpected PayPal subscription response")?;

        let approve_url = created
            .links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.clone())
            .ok_or_else(|| anyhow!("PayPal subscription {} has no approve link", created.id))?;

        info!("Created PayPal subscription {} ({})", created.id, tier.label());
        Ok(CreatedSubscription {
            id: created.id,
            approve_url,
        })
    }

    /// Ask PayPal whether a webhook delivery is authentic.
    pub async fn verify_webhook_signature(
        &self,
        token: &str,
        webhook_id: &str,
        headers: &WebhookHeaders,
        event: &Value,
    ) -> Result<bool> {
        let response = self
            .client
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .bearer_auth(token)
            .json(&json!({
                "auth_algo": headers.auth_algo,
                "cert_url": headers.cert_url,
                "transmission_id": headers.transmission_id,
                "transmission_sig": headers.transmission_sig,
                "transmission_time": headers.transmission_time,
                "webhook_id": webhook_id,
                "webhook_event": event,
            }))
            .send()
            .await
            .context("PayPal webhook verification request failed")?;

        // PayPal answers 4xx when the delivery's signature headers are missing or malformed
        if response.status().is_client_error() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("PayPal refused to verify webhook ({}): {}", status, body);
            return Ok(false);
        }

        let verification: VerificationResponse = error_for_status(response, "verification")
            .await?
            .json()
            .await
            .context("Unexpected PayPal verification response")?;

        Ok(verification.verification_status == "SUCCESS")
    }
}

/// Stable catalog id, so repeated creates collide instead of duplicating.
pub fn product_id(tier: SubscriptionTier) -> String {
    format!("KNOWLEDGE-FORGE-{}", tier.as_str().to_uppercase())
}

async fn error_for_status(response: reqwest::Response, api: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(anyhow!("PayPal {} API error {}: {}", api, status, error_text))
}
