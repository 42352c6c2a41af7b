//! # SpectroCoin Configuration

use pay_core::{PaymentError, PaymentResult, DEFAULT_PROVIDER_TIMEOUT};
use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://spectrocoin.com";

/// SpectroCoin merchant API configuration
#[derive(Debug, Clone)]
pub struct SpectrocoinConfig {
    /// Merchant account ID
    pub merchant_id: String,

    /// Merchant project (API) ID
    pub project_id: String,

    /// Key used to sign requests and verify callbacks
    pub private_key: String,

    pub api_base_url: String,

    pub active: bool,

    pub timeout: Duration,
}

impl SpectrocoinConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `SPECTROCOIN_MERCHANT_ID` is unset.
    /// `SPECTROCOIN_PROJECT_ID` and `SPECTROCOIN_PRIVATE_KEY` are then
    /// required; `SPECTROCOIN_ACTIVE` defaults to `true`.
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let Ok(merchant_id) = env::var("SPECTROCOIN_MERCHANT_ID") else {
            return Ok(None);
        };

        let required = |name: &str| {
            env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    PaymentError::Configuration(format!(
                        "{} must be set when SPECTROCOIN_MERCHANT_ID is",
                        name
                    ))
                })
        };

        let mut config = Self::new(
            merchant_id,
            required("SPECTROCOIN_PROJECT_ID")?,
            required("SPECTROCOIN_PRIVATE_KEY")?,
        );
        config.active = env::var("SPECTROCOIN_ACTIVE")
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

    pub fn new(
        merchant_id: impl Into<String>,
        project_id: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            project_id: project_id.into(),
            private_key: private_key.into(),
            api_base_url: DEFAULT_API_BASE.to_string(),
            active: true,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
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
        env::remove_var("SPECTROCOIN_MERCHANT_ID");
        assert!(SpectrocoinConfig::from_env().unwrap().is_none());

        env::set_var("SPECTROCOIN_MERCHANT_ID", "m-1");
        env::set_var("SPECTROCOIN_PROJECT_ID", "p-1");
        env::remove_var("SPECTROCOIN_PRIVATE_KEY");
        assert!(matches!(
            SpectrocoinConfig::from_env(),
            Err(PaymentError::Configuration(_))
        ));

        env::set_var("SPECTROCOIN_PRIVATE_KEY", "key");
        env::set_var("SPECTROCOIN_ACTIVE", "false");
        let config = SpectrocoinConfig::from_env().unwrap().unwrap();
        assert_eq!(config.project_id, "p-1");
        assert!(!config.active);

        for name in [
            "SPECTROCOIN_MERCHANT_ID",
            "SPECTROCOIN_PROJECT_ID",
            "SPECTROCOIN_PRIVATE_KEY",
            "SPECTROCOIN_ACTIVE",
        ] {
            env::remove_var(name);
        }
    }
}
