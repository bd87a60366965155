pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod paypal;
pub mod subscriptions;

pub use api::{router, AppState, AuthenticatedUser};
pub use auth::{bearer_token, Identity, IdentityProvider, RemoteIdentityProvider};
pub use config::{AuthConfig, BillingConfig, PayPalConfig, PayPalEnvironment};
pub use database::SubscriberStore;
pub use error::{BillingError, BillingResult};
pub use paypal::{product_id, CreatedSubscription, PayPalClient, WebhookHeaders};
pub use subscriptions::{
    apply_event, SubscriptionManager, SubscriptionResource, WebhookEvent, WebhookOutcome,
    WebhookPayload,
};
