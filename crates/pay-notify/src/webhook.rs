//! # Outbound Webhooks
//!
//! Payment events are POSTed as JSON to the configured `WEBHOOK_URL`.
//! Any non-2xx answer counts as a failed delivery.

use async_trait::async_trait;
use pay_core::{NotificationError, PaymentError, PaymentEvent, PaymentResult, WebhookSink};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Webhook sink posting to a fixed URL
pub struct HttpWebhookSink {
    url: String,
    client: Client,
}

impl HttpWebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    #[instrument(skip(self, event), fields(event = %event.event, cart_id = %event.data.cart_id))]
    async fn deliver(&self, event: &PaymentEvent) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotificationError::webhook(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::webhook(format!(
                "{} answered HTTP {}",
                self.url, status
            )));
        }

        debug!(status = %status, "Webhook delivered");
        Ok(())
    }
}

/// Sink used when no webhook URL is configured
#[derive(Debug, Clone, Default)]
pub struct NoopWebhookSink;

#[async_trait]
impl WebhookSink for NoopWebhookSink {
    async fn deliver(&self, event: &PaymentEvent) -> Result<(), NotificationError> {
        debug!(event = %event.event, "Webhook skipped (WEBHOOK_URL not set)");
        Ok(())
    }
}
