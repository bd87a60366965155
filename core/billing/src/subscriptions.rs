use knowledge_forge_schemas::{
    CreateSubscriptionResponse, Subscriber, SubscriptionStatus, SubscriptionStatusResponse,
    SubscriptionTier,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::auth::Identity;
use crate::database::{now_rfc3339, SubscriberStore};
use crate::error::{BillingError, BillingResult};
use crate::paypal::{PayPalClient, WebhookHeaders};

/// Billing lifecycle events we react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Activated,
    Cancelled,
    Suspended,
    Renewed,
    PaymentFailed,
    Other(String),
}

impl WebhookEvent {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "BILLING.SUBSCRIPTION.ACTIVATED" => WebhookEvent::Activated,
            "BILLING.SUBSCRIPTION.CANCELLED" => WebhookEvent::Cancelled,
            "BILLING.SUBSCRIPTION.SUSPENDED" => WebhookEvent::Suspended,
            "BILLING.SUBSCRIPTION.RENEWED" => WebhookEvent::Renewed,
            "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => WebhookEvent::PaymentFailed,
            other => WebhookEvent::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceSubscriber {
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillingInfo {
    #[serde(default)]
    pub next_billing_time: Option<String>,
}

/// The subscription object carried in a webhook's `resource` field
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub subscriber: Option<ResourceSubscriber>,
    #[serde(default)]
    pub billing_info: Option<BillingInfo>,
}

impl SubscriptionResource {
    fn next_billing_time(&self) -> Option<String> {
        self.billing_info
            .as_ref()
            .and_then(|info| info.next_billing_time.clone())
    }

    fn email(&self) -> Option<&str> {
        self.subscriber
            .as_ref()
            .and_then(|s| s.email_address.as_deref())
    }

    /// Tier label from the custom id set at creation, else the plan id.
    fn tier_label(&self) -> &'static str {
        let tier_id = self
            .custom_id
            .as_deref()
            .or(self.plan_id.as_deref())
            .unwrap_or_default();
        SubscriptionTier::from_tier_id(tier_id).label()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event_type: String,
    #[serde(default)]
    pub resource: SubscriptionResource,
}

/// Next subscriber state for an event, or `None` when the event changes nothing.
pub fn apply_event(
    current: &Subscriber,
    event: &WebhookEvent,
    resource: &SubscriptionResource,
    now: &str,
) -> Option<Subscriber> {
    let mut next = current.clone();
    next.updated_at = now.to_string();

    match event {
        WebhookEvent::Activated => {
            next.subscribed = true;
            next.subscription_tier = Some(resource.tier_label().to_string());
            next.subscription_end = resource.next_billing_time();
            next.status = SubscriptionStatus::Active;
            if let Some(id) = &resource.id {
                next.external_subscription_id = Some(id.clone());
            }
        }
        WebhookEvent::Cancelled | WebhookEvent::Suspended => {
            next.subscribed = false;
            next.subscription_tier = None;
            next.subscription_end = None;
            next.status = if *event == WebhookEvent::Cancelled {
                SubscriptionStatus::Cancelled
            } else {
                SubscriptionStatus::Suspended
            };
        }
        WebhookEvent::Renewed => {
            next.subscribed = true;
            if next.subscription_tier.is_none() {
                next.subscription_tier = Some(resource.tier_label().to_string());
            }
            next.subscription_end = resource
                .next_billing_time()
                .or_else(|| current.subscription_end.clone());
            next.status = SubscriptionStatus::Active;
        }
        WebhookEvent::PaymentFailed | WebhookEvent::Other(_) => return None,
    }

    Some(next)
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied(SubscriptionStatus),
    Unchanged,
    UnknownSubscriber,
}

/// Creates subscriptions at PayPal and reconciles subscriber rows from webhooks
pub struct SubscriptionManager {
    paypal: PayPalClient,
    store: Mutex<SubscriberStore>,
    app_url: String,
}

impl SubscriptionManager {
    pub fn new(paypal: PayPalClient, store: SubscriberStore, app_url: impl Into<String>) -> Self {
        Self {
            paypal,
            store: Mutex::new(store),
            app_url: app_url.into(),
        }
    }

    pub async fn create(
        &self,
        identity: &Identity,
        tier: SubscriptionTier,
    ) -> BillingResult<CreateSubscriptionResponse> {
        let email = identity.require_email()?;
        info!("Creating {} subscription for user {}", tier.label(), identity.user_id);

        let token = self.paypal.access_token().await.map_err(BillingError::Provider)?;
        let product_id = self
            .paypal
            .ensure_product(&token, tier)
            .await
            .map_err(BillingError::Provider)?;
        let plan_id = self
            .paypal
            .ensure_plan(&token, &product_id, tier)
            .await
            .map_err(BillingError::Provider)?;
        let created = self
            .paypal
            .create_subscription(&token, &plan_id, tier, email, &self.app_url)
            .await
            .map_err(BillingError::Provider)?;

        let subscriber = Subscriber {
            email: email.to_string(),
            user_id: identity.user_id.clone(),
            external_subscription_id: Some(created.id.clone()),
            subscribed: false,
            subscription_tier: None,
            subscription_end: None,
            status: SubscriptionStatus::Pending,
            updated_at: now_rfc3339(),
        };
        self.store
            .lock()
            .await
            .upsert(&subscriber)
            .map_err(BillingError::Storage)?;

        Ok(CreateSubscriptionResponse {
            url: created.approve_url,
            subscription_id: created.id,
        })
    }

    /// Users with no subscriber row are reported as not subscribed.
    pub async fn status(&self, identity: &Identity) -> BillingResult<SubscriptionStatusResponse> {
        let store = self.store.lock().await;

        let subscriber = match identity.email.as_deref() {
            Some(email) => store.find_by_email(email).map_err(BillingError::Storage)?,
            None => None,
        };
        let subscriber = match subscriber {
            Some(subscriber) => Some(subscriber),
            None => store
                .find_by_user(&identity.user_id)
                .map_err(BillingError::Storage)?,
        };

        Ok(match subscriber {
            Some(s) => SubscriptionStatusResponse {
                subscribed: s.subscribed,
                subscription_tier: s.subscription_tier,
                subscription_end: s.subscription_end,
            },
            None => SubscriptionStatusResponse {
                subscribed: false,
                subscription_tier: None,
                subscription_end: None,
            },
        })
    }

    /// Verify (when a webhook id is configured) and apply one webhook delivery.
    pub async fn handle_webhook(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> BillingResult<WebhookOutcome> {
        let event: Value = serde_json::from_slice(body)
            .map_err(|e| BillingError::BadRequest(format!("invalid webhook payload: {}", e)))?;

        match self.paypal.webhook_id() {
            Some(webhook_id) => {
                let token = self.paypal.access_token().await.map_err(BillingError::Provider)?;
                let verified = self
                    .paypal
                    .verify_webhook_signature(&token, webhook_id, headers, &event)
                    .await
                    .map_err(BillingError::Provider)?;
                if !verified {
                    warn!("Rejected webhook {} with invalid signature", headers.transmission_id);
                    return Err(BillingError::InvalidSignature);
                }
            }
            None => warn!("PAYPAL_WEBHOOK_ID not set, accepting webhook without verification"),
        }

        let payload: WebhookPayload = serde_json::from_value(event)
            .map_err(|e| BillingError::BadRequest(format!("invalid webhook payload: {}", e)))?;
        let kind = WebhookEvent::parse(&payload.event_type);
        info!(
            "Webhook {} for subscription {}",
            payload.event_type,
            payload.resource.id.as_deref().unwrap_or("-")
        );

        match &kind {
            WebhookEvent::PaymentFailed => {
                warn!(
                    "Payment failed for subscription {}; subscriber left unchanged",
                    payload.resource.id.as_deref().unwrap_or("-")
                );
                return Ok(WebhookOutcome::Unchanged);
            }
            WebhookEvent::Other(event_type) => {
                info!("Ignoring webhook event {}", event_type);
                return Ok(WebhookOutcome::Unchanged);
            }
            _ => {}
        }

        let store = self.store.lock().await;

        let mut current = match payload.resource.id.as_deref() {
            Some(id) => store.find_by_subscription_id(id).map_err(BillingError::Storage)?,
            None => None,
        };
        if current.is_none() {
            if let Some(email) = payload.resource.email() {
                current = store.find_by_email(email).map_err(BillingError::Storage)?;
            }
        }

        let Some(current) = current else {
            warn!(
                "No subscriber for webhook {} (subscription {})",
                payload.event_type,
                payload.resource.id.as_deref().unwrap_or("-")
            );
            return Ok(WebhookOutcome::UnknownSubscriber);
        };

        match apply_event(&current, &kind, &payload.resource, &now_rfc3339()) {
            Some(next) => {
                store.upsert(&next).map_err(BillingError::Storage)?;
                info!(
                    "Subscriber {} is now {} (subscribed={})",
                    next.email,
                    next.status.as_str(),
                    next.subscribed
                );
                Ok(WebhookOutcome::Applied(next.status))
            }
            None => Ok(WebhookOutcome::Unchanged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2026-10-18T09:00:00.000000Z";

    fn pending() -> Subscriber {
        Subscriber {
            email: "ada@example.com".to_string(),
            user_id: "user-1".to_string(),
            external_subscription_id: Some("I-SUB1".to_string()),
            subscribed: false,
            subscription_tier: None,
            subscription_end: None,
            status: SubscriptionStatus::Pending,
            updated_at: "2026-10-01T00:00:00.000000Z".to_string(),
        }
    }

    fn resource(custom_id: Option<&str>, plan_id: Option<&str>, next_billing: Option<&str>) -> SubscriptionResource {
        SubscriptionResource {
            id: Some("I-SUB1".to_string()),
            plan_id: plan_id.map(str::to_string),
            custom_id: custom_id.map(str::to_string),
            subscriber: None,
            billing_info: Some(BillingInfo {
                next_billing_time: next_billing.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_event_types() {
        assert_eq!(WebhookEvent::parse("BILLING.SUBSCRIPTION.ACTIVATED"), WebhookEvent::Activated);
        assert_eq!(
            WebhookEvent::parse("BILLING.SUBSCRIPTION.PAYMENT.FAILED"),
            WebhookEvent::PaymentFailed
        );
        assert_eq!(
            WebhookEvent::parse("PAYMENT.SALE.COMPLETED"),
            WebhookEvent::Other("PAYMENT.SALE.COMPLETED".to_string())
        );
    }

    #[test]
    fn test_activation_with_premium_tier() {
        let next = apply_event(
            &pending(),
            &WebhookEvent::Activated,
            &resource(Some("premium"), Some("P-123"), Some("2026-11-18T10:00:00Z")),
            NOW,
        )
        .unwrap();

        assert!(next.subscribed);
        assert_eq!(next.subscription_tier.as_deref(), Some("Premium"));
        assert_eq!(next.subscription_end.as_deref(), Some("2026-11-18T10:00:00Z"));
        assert_eq!(next.status, SubscriptionStatus::Active);
        assert_eq!(next.updated_at, NOW);
    }

    #[test]
    fn test_activation_falls_back_to_plan_id() {
        let premium = apply_event(
            &pending(),
            &WebhookEvent::Activated,
            &resource(None, Some("kf-PREMIUM-monthly"), None),
            NOW,
        )
        .unwrap();
        assert_eq!(premium.subscription_tier.as_deref(), Some("Premium"));

        let pro = apply_event(&pending(), &WebhookEvent::Activated, &resource(None, Some("P-5ML4"), None), NOW).unwrap();
        assert_eq!(pro.subscription_tier.as_deref(), Some("Pro"));
    }

    #[test]
    fn test_cancellation_always_clears_tier_and_end() {
        let active = apply_event(
            &pending(),
            &WebhookEvent::Activated,
            &resource(Some("pro"), None, Some("2026-11-18T10:00:00Z")),
            NOW,
        )
        .unwrap();

        for current in [pending(), active] {
            let next = apply_event(&current, &WebhookEvent::Cancelled, &SubscriptionResource::default(), NOW).unwrap();
            assert!(!next.subscribed);
            assert!(next.subscription_tier.is_none());
            assert!(next.subscription_end.is_none());
            assert_eq!(next.status, SubscriptionStatus::Cancelled);
        }
    }

    #[test]
    fn test_suspension() {
        let next = apply_event(&pending(), &WebhookEvent::Suspended, &SubscriptionResource::default(), NOW).unwrap();
        assert!(!next.subscribed);
        assert_eq!(next.status, SubscriptionStatus::Suspended);
    }

    #[test]
    fn test_renewal_refreshes_end_date() {
        let mut active = pending();
        active.subscribed = true;
        active.subscription_tier = Some("Premium".to_string());
        active.subscription_end = Some("2026-10-18T10:00:00Z".to_string());
        active.status = SubscriptionStatus::Active;

        let next = apply_event(
            &active,
            &WebhookEvent::Renewed,
            &resource(Some("pro"), None, Some("2026-11-18T10:00:00Z")),
            NOW,
        )
        .unwrap();
        assert!(next.subscribed);
        assert_eq!(next.subscription_tier.as_deref(), Some("Premium"));
        assert_eq!(next.subscription_end.as_deref(), Some("2026-11-18T10:00:00Z"));
    }

    #[test]
    fn test_payment_failure_changes_nothing() {
        assert!(apply_event(&pending(), &WebhookEvent::PaymentFailed, &resource(None, None, None), NOW).is_none());
        assert!(apply_event(
            &pending(),
            &WebhookEvent::Other("PAYMENT.SALE.COMPLETED".to_string()),
            &resource(None, None, None),
            NOW
        )
        .is_none());
    }

    #[test]
    fn test_payload_parsing() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{
                "id": "WH-1",
                "event_type": "BILLING.SUBSCRIPTION.ACTIVATED",
                "resource": {
                    "id": "I-SUB1",
                    "plan_id": "P-1",
                    "custom_id": "premium",
                    "status": "ACTIVE",
                    "subscriber": { "email_address": "ada@example.com" },
                    "billing_info": { "next_billing_time": "2026-11-18T10:00:00Z" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(payload.resource.email(), Some("ada@example.com"));
        assert_eq!(payload.resource.tier_label(), "Premium");
        assert_eq!(payload.resource.next_billing_time().as_deref(), Some("2026-11-18T10:00:00Z"));
    }
}
