use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "./data/knowledge.db";
pub const DEFAULT_ADDR: &str = "127.0.0.1:21956";
pub const DEFAULT_APP_URL: &str = "http://localhost:5173";
pub const PAYPAL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayPalEnvironment {
    Sandbox,
    Live,
}

impl PayPalEnvironment {
    pub fn api_base(&self) -> &'static str {
        match self {
            PayPalEnvironment::Sandbox => "https://api-m.sandbox.paypal.com",
            PayPalEnvironment::Live => "https://api-m.paypal.com",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Signature verification is skipped when unset
    pub webhook_id: Option<String>,
    pub environment: PayPalEnvironment,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl PayPalConfig {
    pub fn from_env() -> Result<Self> {
        let environment = match std::env::var("PAYPAL_ENVIRONMENT")
            .unwrap_or_else(|_| "sandbox".to_string())
            .to_lowercase()
            .as_str()
        {
            "live" | "production" => PayPalEnvironment::Live,
            "sandbox" => PayPalEnvironment::Sandbox,
            other => anyhow::bail!("Unknown PAYPAL_ENVIRONMENT '{}'", other),
        };

        Ok(Self {
            client_id: std::env::var("PAYPAL_CLIENT_ID").context("PAYPAL_CLIENT_ID required")?,
            client_secret: std::env::var("PAYPAL_CLIENT_SECRET")
                .context("PAYPAL_CLIENT_SECRET required")?,
            webhook_id: std::env::var("PAYPAL_WEBHOOK_ID").ok().filter(|id| !id.is_empty()),
            environment,
            api_base: std::env::var("PAYPAL_API_BASE")
                .unwrap_or_else(|_| environment.api_base().to_string()),
            timeout_secs: PAYPAL_TIMEOUT_SECS,
        })
    }
}

/// Where bearer tokens are resolved to users
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub auth_url: String,
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub db_path: PathBuf,
    pub addr: String,
    pub app_url: String,
    pub paypal: PayPalConfig,
    pub auth: AuthConfig,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_path: std::env::var("DB_PATH")
                .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
                .into(),
            addr: std::env::var("BILLING_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string()),
            app_url: std::env::var("APP_URL")
                .unwrap_or_else(|_| DEFAULT_APP_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            paypal: PayPalConfig::from_env()?,
            auth: AuthConfig {
                auth_url: std::env::var("AUTH_URL").context("AUTH_URL required")?,
                anon_key: std::env::var("AUTH_ANON_KEY").ok(),
            },
        })
    }
}
