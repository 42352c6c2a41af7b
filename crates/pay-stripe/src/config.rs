//! # Stripe Configuration
//!
//! Configuration management for Stripe integration.
//! All secrets are loaded from environment variables at startup and handed
//! to the adapter at construction.

use pay_core::{PaymentError, PaymentResult, DEFAULT_PROVIDER_TIMEOUT};
use std::env;
use std::time::Duration;

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// Webhook signing secret (whsec_...). Without it callbacks are rejected.
    pub webhook_secret: Option<String>,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,

    /// Whether checkout through Stripe is switched on
    pub active: bool,

    /// HTTP client timeout
    pub timeout: Duration,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `STRIPE_SECRET_KEY` is unset (provider not
    /// configured). Optional: `STRIPE_WEBHOOK_SECRET`, `STRIPE_ACTIVE`
    /// (default `true`), `PROVIDER_TIMEOUT_SECS`.
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let Ok(secret_key) = env::var("STRIPE_SECRET_KEY") else {
            return Ok(None);
        };

        // Validate key formats
        if !secret_key.starts_with("sk_test_") && !secret_key.starts_with("sk_live_") {
            return Err(PaymentError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        let webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());
        if let Some(ref secret) = webhook_secret {
            if !secret.starts_with("whsec_") {
                return Err(PaymentError::Configuration(
                    "STRIPE_WEBHOOK_SECRET must start with whsec_".to_string(),
                ));
            }
        }

        let mut config = Self::new(secret_key);
        config.webhook_secret = webhook_secret;
        config.active = env::var("STRIPE_ACTIVE")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        if let Some(secs) = env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(Some(config))
    }

    /// Create config with explicit values (for testing)
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: None,
            api_base_url: "https://api.stripe.com".to_string(),
            api_version: "2024-12-18.acacia".to_string(),
            active: true,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Check if using test keys
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}
