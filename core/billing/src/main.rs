use anyhow::Result;
use knowledge_forge_billing::{
    router, AppState, BillingConfig, PayPalClient, RemoteIdentityProvider, SubscriberStore,
    SubscriptionManager,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Knowledge Forge Billing Service v0.1.0");

    let config = BillingConfig::from_env()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = SubscriberStore::new(&config.db_path)?;
    info!("Database initialized at: {}", config.db_path.display());

    info!(
        "PayPal environment: {:?} ({})",
        config.paypal.environment, config.paypal.api_base
    );
    if config.paypal.webhook_id.is_none() {
        warn!("PAYPAL_WEBHOOK_ID not set, webhook signatures will not be verified");
    }

    let paypal = PayPalClient::new(config.paypal.clone())?;
    let identity = RemoteIdentityProvider::new(config.auth.clone())?;
    let manager = SubscriptionManager::new(paypal, store, config.app_url.clone());
    let app = router(AppState::new(manager, Arc::new(identity)));

    // Start server
    info!("Starting HTTP server on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
