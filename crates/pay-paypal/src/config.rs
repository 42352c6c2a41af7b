//! # PayPal Configuration
//!
//! REST credentials and environment selection, loaded from environment
//! variables at startup.

use pay_core::{PaymentError, PaymentResult, DEFAULT_PROVIDER_TIMEOUT};
use std::env;
use std::time::Duration;

pub const SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";
pub const LIVE_API_BASE: &str = "https://api-m.paypal.com";

/// PayPal REST API configuration
#[derive(Debug, Clone)]
pub struct PaypalConfig {
    /// REST app client ID
    pub client_id: String,

    /// REST app secret
    pub secret_key: String,

    /// Webhook ID from the developer dashboard; required to verify callbacks
    pub webhook_id: Option<String>,

    /// API base URL (sandbox, live, or a mock server)
    pub api_base_url: String,

    /// Whether checkout through PayPal is switched on
    pub active: bool,

    /// HTTP client timeout
    pub timeout: Duration,
}

impl PaypalConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `PAYPAL_CLIENT_ID` is unset. Optional:
    /// `PAYPAL_WEBHOOK_ID`, `PAYPAL_SANDBOX` (default `true`),
    /// `PAYPAL_ACTIVE` (default `true`), `PROVIDER_TIMEOUT_SECS`.
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let Ok(client_id) = env::var("PAYPAL_CLIENT_ID") else {
            return Ok(None);
        };

        let secret_key = env::var("PAYPAL_SECRET_KEY").map_err(|_| {
            PaymentError::Configuration(
                "PAYPAL_SECRET_KEY must be set when PAYPAL_CLIENT_ID is".to_string(),
            )
        })?;

        let sandbox = env::var("PAYPAL_SANDBOX")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let mut config = Self::new(client_id, secret_key);
        config.api_base_url = if sandbox {
            SANDBOX_API_BASE.to_string()
        } else {
            LIVE_API_BASE.to_string()
        };
        config.webhook_id = env::var("PAYPAL_WEBHOOK_ID").ok().filter(|s| !s.is_empty());
        config.active = env::var("PAYPAL_ACTIVE")
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

    /// Sandbox config with explicit credentials
    pub fn new(client_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret_key: secret_key.into(),
            webhook_id: None,
            api_base_url: SANDBOX_API_BASE.to_string(),
            active: true,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.api_base_url == SANDBOX_API_BASE
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_webhook_id(mut self, id: impl Into<String>) -> Self {
        self.webhook_id = Some(id.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        env::remove_var("PAYPAL_CLIENT_ID");
        assert!(PaypalConfig::from_env().unwrap().is_none());

        env::set_var("PAYPAL_CLIENT_ID", "client");
        env::remove_var("PAYPAL_SECRET_KEY");
        assert!(matches!(
            PaypalConfig::from_env(),
            Err(PaymentError::Configuration(_))
        ));

        env::set_var("PAYPAL_SECRET_KEY", "secret");
        env::set_var("PAYPAL_SANDBOX", "false");
        let config = PaypalConfig::from_env().unwrap().unwrap();
        assert_eq!(config.api_base_url, LIVE_API_BASE);
        assert!(!config.is_sandbox());
        assert!(config.active);

        env::remove_var("PAYPAL_CLIENT_ID");
        env::remove_var("PAYPAL_SECRET_KEY");
        env::remove_var("PAYPAL_SANDBOX");
    }
}
