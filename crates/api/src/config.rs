//! Server configuration loaded from the environment.

use anyhow::Context;

use praxis_events::WebhookSecrets;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Direct (non-pooled) URL for migrations; falls back to `database_url`.
    pub database_direct_url: Option<String>,
    pub bind_address: String,
    /// Signing secret for the account-level webhook endpoint.
    pub stripe_webhook_secret: String,
    /// Signing secret for the connected-accounts webhook endpoint.
    pub stripe_connect_webhook_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .context("STRIPE_WEBHOOK_SECRET must be set")?;

        // Connect events arrive on a separate endpoint with its own secret;
        // default to the account secret for single-endpoint deployments.
        let stripe_connect_webhook_secret = std::env::var("STRIPE_CONNECT_WEBHOOK_SECRET")
            .unwrap_or_else(|_| stripe_webhook_secret.clone());

        Ok(Self {
            database_url,
            database_direct_url: std::env::var("DATABASE_DIRECT_URL").ok(),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            stripe_webhook_secret,
            stripe_connect_webhook_secret,
        })
    }

    pub fn webhook_secrets(&self) -> WebhookSecrets {
        WebhookSecrets::new(
            self.stripe_webhook_secret.clone(),
            self.stripe_connect_webhook_secret.clone(),
        )
    }
}
