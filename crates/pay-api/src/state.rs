//! # Application State
//!
//! Configuration read once at startup and the wired-up payment
//! orchestrator shared by every handler.

use anyhow::Context;
use pay_core::{
    BoxedCartStore, BoxedProviderAdapter, CheckoutUrls, Currency, Mailer, MemoryCartStore,
    Notifier, OrchestratorConfig, PaymentOrchestrator, ProductCatalog, ProviderRegistry,
    WebhookSink, DEFAULT_PROVIDER_TIMEOUT,
};
use pay_notify::{
    HttpWebhookSink, LogMailer, NoopWebhookSink, SmtpConfig, SmtpMailer, DEFAULT_WEBHOOK_TIMEOUT,
};
use pay_paypal::PaypalAdapter;
use pay_spectrocoin::SpectrocoinAdapter;
use pay_sqlite::SqliteCartStore;
use pay_stripe::StripeAdapter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL used to build provider return URLs
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Store currency
    pub currency: Currency,
    /// SQLite file; in-memory store when unset
    pub database_path: Option<String>,
    /// Bound on every provider call
    pub provider_timeout: Duration,
    /// Outbound payment-event webhook
    pub webhook_url: Option<String>,
    /// Bearer token for `/api/_/` routes; those routes are hidden when unset
    pub admin_token: Option<String>,
}

impl AppConfig {
    /// Load from environment variables (and `.env` when present)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let optional = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let currency = match optional("CURRENCY") {
            Some(code) => code
                .parse()
                .map_err(|e| anyhow::anyhow!("CURRENCY: {}", e))?,
            None => Currency::USD,
        };

        let provider_timeout = match optional("PROVIDER_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("PROVIDER_TIMEOUT_SECS: {}", secs))?,
            ),
            None => DEFAULT_PROVIDER_TIMEOUT,
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            currency,
            database_path: optional("DATABASE_PATH"),
            provider_timeout,
            webhook_url: optional("WEBHOOK_URL"),
            admin_token: optional("ADMIN_TOKEN"),
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            environment: "development".to_string(),
            currency: Currency::USD,
            database_path: None,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            webhook_url: None,
            admin_token: None,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: PaymentOrchestrator,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire every component from the environment
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let urls = CheckoutUrls::new(&config.base_url);
        let catalog = load_product_catalog()?;

        let orchestrator = PaymentOrchestrator::new(
            load_providers()?,
            open_store(&config)?,
            Arc::new(catalog),
            build_notifier(&config)?,
            urls,
            OrchestratorConfig {
                currency: config.currency,
                provider_timeout: config.provider_timeout,
            },
        );

        Ok(Self::from_parts(config, orchestrator))
    }

    pub fn from_parts(config: AppConfig, orchestrator: PaymentOrchestrator) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }
}

/// Register every provider whose credentials are present
fn load_providers() -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    if let Some(stripe) = StripeAdapter::from_env().context("Failed to initialize Stripe")? {
        registry.register(Arc::new(stripe) as BoxedProviderAdapter);
    }
    if let Some(paypal) = PaypalAdapter::from_env().context("Failed to initialize PayPal")? {
        registry.register(Arc::new(paypal) as BoxedProviderAdapter);
    }
    if let Some(spectrocoin) =
        SpectrocoinAdapter::from_env().context("Failed to initialize SpectroCoin")?
    {
        registry.register(Arc::new(spectrocoin) as BoxedProviderAdapter);
    }

    if registry.providers().is_empty() {
        warn!("No payment providers configured");
    }
    Ok(registry)
}

fn open_store(config: &AppConfig) -> anyhow::Result<BoxedCartStore> {
    match &config.database_path {
        Some(path) => {
            let store = SqliteCartStore::open(path)
                .with_context(|| format!("Failed to open cart database {}", path))?;
            info!("Cart store: sqlite at {}", path);
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_PATH not set, carts are kept in memory only");
            Ok(Arc::new(MemoryCartStore::new()))
        }
    }
}

fn build_notifier(config: &AppConfig) -> anyhow::Result<Notifier> {
    let mailer: Arc<dyn Mailer> = match SmtpConfig::from_env()? {
        Some(smtp) => Arc::new(SmtpMailer::new(&smtp)?),
        None => {
            warn!("SMTP_HOST not set, emails are logged only");
            Arc::new(LogMailer)
        }
    };

    let webhooks: Arc<dyn WebhookSink> = match &config.webhook_url {
        Some(url) => Arc::new(HttpWebhookSink::new(url, DEFAULT_WEBHOOK_TIMEOUT)?),
        None => Arc::new(NoopWebhookSink),
    };

    Ok(Notifier::new(mailer, webhooks))
}

/// Load product catalog from config file
fn load_product_catalog() -> anyhow::Result<ProductCatalog> {
    let config_paths = [
        "config/products.toml",
        "../config/products.toml",
        "../../config/products.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let catalog = ProductCatalog::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", path))?;
            info!("Loaded {} products from {}", catalog.products.len(), path);
            return Ok(catalog);
        }
    }

    warn!("No product catalog found, using empty catalog");
    Ok(ProductCatalog::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_from_env() {
        for name in [
            "HOST",
            "PORT",
            "BASE_URL",
            "CURRENCY",
            "DATABASE_PATH",
            "PROVIDER_TIMEOUT_SECS",
            "ADMIN_TOKEN",
        ] {
            std::env::remove_var(name);
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.currency, Currency::USD);
        assert_eq!(config.provider_timeout, DEFAULT_PROVIDER_TIMEOUT);
        assert!(config.admin_token.is_none());

        std::env::set_var("CURRENCY", "eur");
        std::env::set_var("PROVIDER_TIMEOUT_SECS", "3");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.currency, Currency::EUR);
        assert_eq!(config.provider_timeout, Duration::from_secs(3));

        std::env::set_var("CURRENCY", "XYZ");
        assert!(AppConfig::from_env().is_err());

        std::env::remove_var("CURRENCY");
        std::env::remove_var("PROVIDER_TIMEOUT_SECS");
    }

    #[test]
    fn test_socket_addr() {
        let config = AppConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            ..AppConfig::default()
        };
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:3000");

        let bad = AppConfig {
            host: "not a host".to_string(),
            ..AppConfig::default()
        };
        assert!(bad.socket_addr().is_err());
    }
}
