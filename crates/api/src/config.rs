//! Server configuration from environment variables.

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    /// Base URL of the payment gateway's REST API.
    pub gateway_base_url: String,
    pub gateway_api_secret: String,
    /// App Store shared secret for receipt verification.
    pub apple_shared_secret: String,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let gateway_base_url = std::env::var("PAYMENT_GATEWAY_URL")
            .context("PAYMENT_GATEWAY_URL must be set")?
            .trim_end_matches('/')
            .to_string();
        let gateway_api_secret =
            std::env::var("PAYMENT_GATEWAY_SECRET").context("PAYMENT_GATEWAY_SECRET must be set")?;

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url,
            gateway_base_url,
            gateway_api_secret,
            apple_shared_secret: std::env::var("APPLE_SHARED_SECRET").unwrap_or_default(),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}
