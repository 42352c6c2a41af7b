//! # Stripe Checkout Sessions
//!
//! [`ProviderAdapter`] over the Stripe Checkout Sessions API.
//!
//! - `create_session`: `POST /v1/checkout/sessions` with one `price_data`
//!   line per cart item; `client_reference_id` carries the cart ID.
//! - Success redirect: `GET /v1/checkout/sessions/{id}`; the redirect's
//!   `session` parameter is Stripe's `{CHECKOUT_SESSION_ID}` template.
//! - Callback: the dashboard webhook endpoint points at
//!   `/cart/payment/callback?payment_system=stripe`; events are verified
//!   with the `Stripe-Signature` header before they are read.

use crate::config::StripeConfig;
use crate::signature::{verify_signature, DEFAULT_TOLERANCE_SECS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pay_core::{
    CallbackPayload, Cart, CheckoutSession, PaymentError, PaymentProvider, PaymentResult,
    ProviderAdapter, Resolution, ResolvedStatus, SessionOutcome, SessionUrls, StatusQuery,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

const PROVIDER: &str = "stripe";

/// Stripe Checkout Session adapter
///
/// Uses Stripe's hosted checkout page for secure payments.
pub struct StripeAdapter {
    config: StripeConfig,
    client: Client,
}

impl StripeAdapter {
    /// Create a new Stripe adapter
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables; `None` when Stripe is not configured
    pub fn from_env() -> PaymentResult<Option<Self>> {
        StripeConfig::from_env()?.map(Self::new).transpose()
    }

    /// Form parameters for a new Checkout Session
    fn session_form(cart: &Cart, urls: &SessionUrls) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "success_url".to_string(),
                format!("{}&session={{CHECKOUT_SESSION_ID}}", urls.success_url),
            ),
            ("cancel_url".to_string(), urls.cancel_url.clone()),
            ("client_reference_id".to_string(), cart.id.clone()),
            ("customer_email".to_string(), cart.email.clone()),
            ("metadata[cart_id]".to_string(), cart.id.clone()),
        ];

        let currency = cart.currency.as_str().to_ascii_lowercase();
        for (i, item) in cart.items.iter().enumerate() {
            form.push((
                format!("line_items[{}][price_data][currency]", i),
                currency.clone(),
            ));
            form.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            if let Some(ref image) = item.image_url {
                form.push((
                    format!("line_items[{}][price_data][product_data][images][0]", i),
                    image.clone(),
                ));
            }
            form.push((
                format!("line_items[{}][quantity]", i),
                item.quantity.to_string(),
            ));
        }

        form
    }

    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<StripeSession> {
        let url = format!(
            "{}/v1/checkout/sessions/{}",
            self.config.api_base_url, session_id
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if status == StatusCode::NOT_FOUND {
            return Err(PaymentError::rejected(
                PROVIDER,
                format!("unknown checkout session {}", session_id),
            ));
        }
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse Stripe session: {}", e))
        })
    }

    fn resolve_callback(&self, payload: &CallbackPayload) -> PaymentResult<Resolution> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .ok_or_else(|| PaymentError::rejected(PROVIDER, "webhook secret not configured"))?;
        let header = payload
            .header("stripe-signature")
            .ok_or_else(|| PaymentError::rejected(PROVIDER, "missing Stripe-Signature header"))?;

        verify_signature(
            &payload.body,
            header,
            secret,
            Utc::now().timestamp(),
            DEFAULT_TOLERANCE_SECS,
        )?;

        let event: StripeEvent = serde_json::from_slice(&payload.body)
            .map_err(|e| PaymentError::rejected(PROVIDER, format!("malformed event: {}", e)))?;

        debug!(event_id = %event.id, event_type = %event.event_type, "Verified Stripe webhook");

        let session = event.data.object;
        let status = event_status(&event.event_type, &session);
        Ok(session.into_resolution(status))
    }
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn is_active(&self) -> bool {
        self.config.active
    }

    #[instrument(skip(self, cart, urls), fields(cart_id = %cart.id))]
    async fn create_session(
        &self,
        cart: &Cart,
        urls: &SessionUrls,
    ) -> PaymentResult<SessionOutcome> {
        if !self.config.active {
            return Ok(SessionOutcome::Disabled);
        }

        let form = Self::session_form(cart, urls);
        debug!(items = cart.items.len(), "Creating Stripe checkout session");

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &cart.id)
            .form(&form)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);
            return Err(api_error(status, &body));
        }

        let session: StripeSession = serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse Stripe response: {}", e))
        })?;

        let checkout_url = session
            .url
            .clone()
            .ok_or_else(|| PaymentError::unavailable(PROVIDER, "session has no checkout url"))?;

        info!(session_id = %session.id, "Created Stripe checkout session");

        let mut opened = CheckoutSession::new(session.id, PaymentProvider::Stripe, checkout_url);
        opened.expires_at = session
            .expires_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
        Ok(SessionOutcome::Opened(opened))
    }

    #[instrument(skip(self, query))]
    async fn resolve_status(&self, query: StatusQuery<'_>) -> PaymentResult<Resolution> {
        match query {
            StatusQuery::Session { token, .. } => {
                let session = self.retrieve_session(token).await?;
                let status = session_status(&session);
                Ok(session.into_resolution(status))
            }
            StatusQuery::Callback(payload) => self.resolve_callback(payload),
        }
    }
}

// =============================================================================
// Status Mapping
// =============================================================================

/// Status of a retrieved session
fn session_status(session: &StripeSession) -> ResolvedStatus {
    match (session.status.as_deref(), session.payment_status.as_deref()) {
        (Some("complete"), Some("paid" | "no_payment_required")) => ResolvedStatus::Paid,
        (Some("expired"), _) => ResolvedStatus::Canceled,
        _ => ResolvedStatus::Unknown,
    }
}

/// Status carried by a webhook event
fn event_status(event_type: &str, session: &StripeSession) -> ResolvedStatus {
    match event_type {
        "checkout.session.completed" => match session.payment_status.as_deref() {
            Some("paid" | "no_payment_required") => ResolvedStatus::Paid,
            // Delayed methods settle through async_payment_* later.
            _ => ResolvedStatus::Unknown,
        },
        "checkout.session.async_payment_succeeded" => ResolvedStatus::Paid,
        "checkout.session.async_payment_failed" => ResolvedStatus::Failed,
        "checkout.session.expired" => ResolvedStatus::Canceled,
        other => {
            warn!(event_type = %other, "Ignoring unhandled Stripe event");
            ResolvedStatus::Unknown
        }
    }
}

fn network_error(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::unavailable(PROVIDER, "request timed out")
    } else {
        PaymentError::unavailable(PROVIDER, e.to_string())
    }
}

fn api_error(status: StatusCode, body: &str) -> PaymentError {
    let message = serde_json::from_str::<StripeErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));
    PaymentError::unavailable(PROVIDER, message)
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl StripeSession {
    /// The session ID stays the provider reference, so a later success
    /// redirect with `session=` still matches the stored cart.
    fn into_resolution(self, status: ResolvedStatus) -> Resolution {
        let mut resolution = Resolution::new(status).with_reference(self.id);
        if let Some(cart_id) = self.client_reference_id {
            resolution = resolution.with_cart_id(cart_id);
        }
        if let Some(amount) = self.amount_total {
            resolution = resolution.with_amount(amount);
        }
        resolution
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeSession,
}
