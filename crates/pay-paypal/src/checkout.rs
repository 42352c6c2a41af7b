//! # PayPal Orders
//!
//! [`ProviderAdapter`] over PayPal's Orders v2 API.
//!
//! - `create_session`: `POST /v2/checkout/orders` (intent `CAPTURE`) with
//!   the cart ID as `custom_id`; the customer approves on the `approve` /
//!   `payer-action` link and returns with `token=<order id>`.
//! - Success redirect: `GET /v2/checkout/orders/{id}`; an `APPROVED` order is
//!   captured (idempotent through `PayPal-Request-Id`) before it counts as paid.
//! - Callback: webhook events are verified remotely through
//!   `POST /v1/notifications/verify-webhook-signature`.

use crate::config::PaypalConfig;
use async_trait::async_trait;
use pay_core::{
    CallbackPayload, Cart, CheckoutSession, Currency, PaymentError, PaymentProvider,
    PaymentResult, ProviderAdapter, Resolution, ResolvedStatus, SessionOutcome, SessionUrls,
    StatusQuery,
};
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

const PROVIDER: &str = "paypal";

/// Headers PayPal signs webhook deliveries with
const SIGNATURE_HEADERS: [(&str, &str); 5] = [
    ("auth_algo", "paypal-auth-algo"),
    ("cert_url", "paypal-cert-url"),
    ("transmission_id", "paypal-transmission-id"),
    ("transmission_sig", "paypal-transmission-sig"),
    ("transmission_time", "paypal-transmission-time"),
];

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// PayPal Orders adapter
pub struct PaypalAdapter {
    config: PaypalConfig,
    client: Client,
    token: Mutex<Option<AccessToken>>,
}

impl PaypalAdapter {
    pub fn new(config: PaypalConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    /// Create from environment variables; `None` when PayPal is not configured
    pub fn from_env() -> PaymentResult<Option<Self>> {
        PaypalConfig::from_env()?.map(Self::new).transpose()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// Client-credentials token, cached until shortly before expiry
    async fn access_token(&self) -> PaymentResult<String> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.value.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.secret_key))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;
        if !status.is_success() {
            error!("PayPal token error: status={}, body={}", status, body);
            return Err(PaymentError::unavailable(
                PROVIDER,
                format!("token request failed: HTTP {}", status),
            ));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse PayPal token: {}", e))
        })?;

        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.token.lock() = Some(AccessToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    /// Send an authorized request and decode a JSON body
    async fn call<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> PaymentResult<T> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if status == StatusCode::NOT_FOUND {
            return Err(PaymentError::rejected(PROVIDER, "unknown order"));
        }
        if !status.is_success() {
            error!("PayPal API error: status={}, body={}", status, body);
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| format!("{}: {}", e.name, e.message))
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(PaymentError::unavailable(PROVIDER, message));
        }

        serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse PayPal response: {}", e))
        })
    }

    fn order_body(cart: &Cart, urls: &SessionUrls) -> Value {
        let currency = cart.currency.as_str();
        let total = cart.currency.format_minor(cart.amount_total);
        let items: Vec<Value> = cart
            .items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "sku": item.product_id,
                    "quantity": item.quantity.to_string(),
                    "unit_amount": {
                        "currency_code": currency,
                        "value": cart.currency.format_minor(item.unit_amount),
                    },
                })
            })
            .collect();

        json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": cart.id,
                "custom_id": cart.id,
                "amount": {
                    "currency_code": currency,
                    "value": total,
                    "breakdown": {
                        "item_total": { "currency_code": currency, "value": total },
                    },
                },
                "items": items,
            }],
            "application_context": {
                "return_url": urls.success_url,
                "cancel_url": urls.cancel_url,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
            },
        })
    }

    async fn get_order(&self, order_id: &str) -> PaymentResult<Order> {
        self.call(self.client.get(self.url(&format!("/v2/checkout/orders/{}", order_id))))
            .await
    }

    async fn capture_order(&self, order_id: &str) -> PaymentResult<Order> {
        info!(order_id = %order_id, "Capturing approved PayPal order");
        self.call(
            self.client
                .post(self.url(&format!("/v2/checkout/orders/{}/capture", order_id)))
                .header("PayPal-Request-Id", format!("capture-{}", order_id))
                .json(&json!({})),
        )
        .await
    }

    /// Settle an order: capture it if the buyer approved it, then map status
    async fn settle(&self, order: Order) -> PaymentResult<Resolution> {
        let order = if order.status == "APPROVED" {
            self.capture_order(&order.id).await?
        } else {
            order
        };
        Ok(order.into_resolution())
    }

    async fn verify_webhook(&self, payload: &CallbackPayload, event: &Value) -> PaymentResult<()> {
        let webhook_id = self
            .config
            .webhook_id
            .as_deref()
            .ok_or_else(|| PaymentError::rejected(PROVIDER, "webhook id not configured"))?;

        let mut body = serde_json::Map::new();
        for (field, header) in SIGNATURE_HEADERS {
            let value = payload
                .header(header)
                .ok_or_else(|| PaymentError::rejected(PROVIDER, format!("missing {} header", header)))?;
            body.insert(field.to_string(), Value::String(value.to_string()));
        }
        body.insert("webhook_id".to_string(), Value::String(webhook_id.to_string()));
        body.insert("webhook_event".to_string(), event.clone());

        let verification: VerifyResponse = self
            .call(
                self.client
                    .post(self.url("/v1/notifications/verify-webhook-signature"))
                    .json(&Value::Object(body)),
            )
            .await?;

        if verification.verification_status != "SUCCESS" {
            return Err(PaymentError::rejected(PROVIDER, "webhook signature not verified"));
        }
        Ok(())
    }

    async fn resolve_callback(&self, payload: &CallbackPayload) -> PaymentResult<Resolution> {
        let event: Value = serde_json::from_slice(&payload.body)
            .map_err(|e| PaymentError::rejected(PROVIDER, format!("malformed event: {}", e)))?;

        self.verify_webhook(payload, &event).await?;

        let webhook: WebhookEvent = serde_json::from_value(event)
            .map_err(|e| PaymentError::rejected(PROVIDER, format!("unexpected event shape: {}", e)))?;
        debug!(event_id = %webhook.id, event_type = %webhook.event_type, "Verified PayPal webhook");

        let resource = webhook.resource;
        match webhook.event_type.as_str() {
            "CHECKOUT.ORDER.APPROVED" => {
                let order: Order = serde_json::from_value(resource)
                    .map_err(|e| PaymentError::rejected(PROVIDER, format!("bad order: {}", e)))?;
                self.settle(order).await
            }
            "PAYMENT.CAPTURE.COMPLETED" | "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => {
                let capture: Capture = serde_json::from_value(resource)
                    .map_err(|e| PaymentError::rejected(PROVIDER, format!("bad capture: {}", e)))?;
                Ok(capture.into_resolution())
            }
            "CHECKOUT.ORDER.VOIDED" => {
                let order: Order = serde_json::from_value(resource)
                    .map_err(|e| PaymentError::rejected(PROVIDER, format!("bad order: {}", e)))?;
                Ok(order.into_resolution())
            }
            other => {
                warn!(event_type = %other, "Ignoring unhandled PayPal event");
                Ok(Resolution::new(ResolvedStatus::Unknown))
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for PaypalAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paypal
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

        let order: Order = self
            .call(
                self.client
                    .post(self.url("/v2/checkout/orders"))
                    .header("PayPal-Request-Id", format!("order-{}", cart.id))
                    .json(&Self::order_body(cart, urls)),
            )
            .await?;

        let approve_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone())
            .ok_or_else(|| PaymentError::unavailable(PROVIDER, "order has no approval link"))?;

        info!(order_id = %order.id, "Created PayPal order");

        Ok(SessionOutcome::Opened(CheckoutSession::new(
            order.id,
            PaymentProvider::Paypal,
            approve_url,
        )))
    }

    #[instrument(skip(self, query))]
    async fn resolve_status(&self, query: StatusQuery<'_>) -> PaymentResult<Resolution> {
        match query {
            StatusQuery::Session { token, .. } => {
                let order = self.get_order(token).await?;
                self.settle(order).await
            }
            StatusQuery::Callback(payload) => self.resolve_callback(payload).await,
        }
    }
}

// =============================================================================
// Status Mapping
// =============================================================================

fn order_status(status: &str) -> ResolvedStatus {
    match status {
        "COMPLETED" => ResolvedStatus::Paid,
        "VOIDED" => ResolvedStatus::Canceled,
        // CREATED, SAVED, APPROVED (not yet captured), PAYER_ACTION_REQUIRED
        _ => ResolvedStatus::Unknown,
    }
}

fn capture_status(status: &str) -> ResolvedStatus {
    match status {
        "COMPLETED" => ResolvedStatus::Paid,
        "DECLINED" | "DENIED" | "FAILED" => ResolvedStatus::Failed,
        _ => ResolvedStatus::Unknown,
    }
}

fn network_error(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::unavailable(PROVIDER, "request timed out")
    } else {
        PaymentError::unavailable(PROVIDER, e.to_string())
    }
}

// =============================================================================
// PayPal API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    name: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct Money {
    currency_code: String,
    value: String,
}

impl Money {
    fn minor(&self) -> Option<i64> {
        let currency = self.currency_code.parse::<Currency>().ok()?;
        currency.parse_minor(&self.value)
    }
}

#[derive(Debug, Deserialize)]
struct Order {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    amount: Option<Money>,
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    status: String,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    amount: Option<Money>,
    #[serde(default)]
    supplementary_data: Option<SupplementaryData>,
}

#[derive(Debug, Deserialize)]
struct SupplementaryData {
    related_ids: RelatedIds,
}

#[derive(Debug, Deserialize)]
struct RelatedIds {
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    event_type: String,
    resource: Value,
}

impl Order {
    /// The order ID stays the provider reference, matching the `token`
    /// PayPal appends to the return URL.
    fn into_resolution(self) -> Resolution {
        let unit = self.purchase_units.first();
        let capture = unit
            .and_then(|u| u.payments.as_ref())
            .and_then(|p| p.captures.first());

        let status = match capture {
            Some(c) if self.status == "COMPLETED" => capture_status(&c.status),
            _ => order_status(&self.status),
        };

        let mut resolution = Resolution::new(status);
        if let Some(cart_id) = unit.and_then(|u| u.custom_id.clone()) {
            resolution = resolution.with_cart_id(cart_id);
        }
        if let Some(amount) = unit.and_then(|u| u.amount.as_ref()).and_then(Money::minor) {
            resolution = resolution.with_amount(amount);
        }
        resolution.with_reference(self.id)
    }
}

impl Capture {
    fn into_resolution(self) -> Resolution {
        let mut resolution = Resolution::new(capture_status(&self.status));
        if let Some(order_id) = self.supplementary_data.and_then(|s| s.related_ids.order_id) {
            resolution = resolution.with_reference(order_id);
        }
        if let Some(cart_id) = self.custom_id {
            resolution = resolution.with_cart_id(cart_id);
        }
        if let Some(amount) = self.amount.as_ref().and_then(Money::minor) {
            resolution = resolution.with_amount(amount);
        }
        resolution
    }
}
