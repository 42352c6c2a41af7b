//! # SpectroCoin Merchant Orders
//!
//! [`ProviderAdapter`] over the SpectroCoin merchant API.
//!
//! - `create_session`: signed `POST /api/merchant/1/createOrder`, keyed by
//!   the cart ID as `orderId`; the buyer pays on the returned `redirectUrl`.
//! - Success redirect: the redirect carries no token, so the order is
//!   re-read with a signed `POST /api/merchant/1/getOrder`.
//! - Callback: a form-encoded body whose `sign` field must verify against
//!   the merchant key and whose merchant/project IDs must match ours.

use crate::config::SpectrocoinConfig;
use crate::sign;
use async_trait::async_trait;
use pay_core::{
    CallbackPayload, Cart, CheckoutSession, Currency, PaymentError, PaymentProvider,
    PaymentResult, ProviderAdapter, Resolution, ResolvedStatus, SessionOutcome, SessionUrls,
    StatusQuery,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info, instrument};

const PROVIDER: &str = "spectrocoin";

/// Crypto currency the buyer pays in
const PAY_CURRENCY: &str = "BTC";

/// SpectroCoin merchant adapter
pub struct SpectrocoinAdapter {
    config: SpectrocoinConfig,
    client: Client,
}

impl SpectrocoinAdapter {
    pub fn new(config: SpectrocoinConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables; `None` when SpectroCoin is not configured
    pub fn from_env() -> PaymentResult<Option<Self>> {
        SpectrocoinConfig::from_env()?.map(Self::new).transpose()
    }

    /// Merchant identity fields every request starts from
    fn base_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("merchantId".to_string(), self.config.merchant_id.clone());
        fields.insert("apiId".to_string(), self.config.project_id.clone());
        fields
    }

    fn order_fields(&self, cart: &Cart, urls: &SessionUrls) -> BTreeMap<String, String> {
        let mut fields = self.base_fields();
        let mut put = |k: &str, v: String| {
            fields.insert(k.to_string(), v);
        };
        put("orderId", cart.id.clone());
        put("payCurrency", PAY_CURRENCY.to_string());
        put("receiveAmount", cart.currency.format_minor(cart.amount_total));
        put("receiveCurrency", cart.currency.to_string());
        put("description", format!("Cart {}", cart.id));
        put("culture", "en".to_string());
        put("callbackUrl", urls.callback_url.clone());
        put("successUrl", urls.success_url.clone());
        put("failureUrl", urls.cancel_url.clone());
        fields
    }

    /// Sign the fields and post them form-encoded
    async fn post_signed(
        &self,
        path: &str,
        mut fields: BTreeMap<String, String>,
    ) -> PaymentResult<MerchantOrder> {
        let signature = sign::sign(&fields, &self.config.private_key)?;
        fields.insert(sign::SIGN_FIELD.to_string(), signature);

        let response = self
            .client
            .post(format!("{}{}", self.config.api_base_url, path))
            .form(&fields)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if status == StatusCode::NOT_FOUND {
            return Err(PaymentError::rejected(PROVIDER, "unknown order"));
        }
        if !status.is_success() {
            error!("SpectroCoin API error: status={}, body={}", status, body);
            return Err(api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|_| api_error(status, &body))
    }

    fn resolve_callback(&self, payload: &CallbackPayload) -> PaymentResult<Resolution> {
        let fields: BTreeMap<String, String> = url::form_urlencoded::parse(&payload.body)
            .into_owned()
            .collect();

        sign::verify(&fields, &self.config.private_key)?;

        let field = |name: &str| fields.get(name).map(String::as_str);
        if field("merchantId") != Some(self.config.merchant_id.as_str())
            || field("apiId") != Some(self.config.project_id.as_str())
        {
            return Err(PaymentError::rejected(PROVIDER, "callback for another merchant"));
        }

        let code = field("status")
            .and_then(|s| s.trim().parse::<u8>().ok())
            .ok_or_else(|| PaymentError::rejected(PROVIDER, "missing order status"))?;

        debug!(order_id = ?field("orderId"), status = code, "Verified SpectroCoin callback");

        let mut resolution = Resolution::new(order_status(code));
        if let Some(reference) = field("orderRequestId") {
            resolution = resolution.with_reference(reference);
        }
        if let Some(cart_id) = field("orderId") {
            resolution = resolution.with_cart_id(cart_id);
        }
        if let Some(amount) = field("receiveCurrency")
            .and_then(|c| c.parse::<Currency>().ok())
            .zip(field("receiveAmount"))
            .and_then(|(currency, value)| currency.parse_minor(value))
        {
            resolution = resolution.with_amount(amount);
        }
        Ok(resolution)
    }
}

#[async_trait]
impl ProviderAdapter for SpectrocoinAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Spectrocoin
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

        let order = self
            .post_signed("/api/merchant/1/createOrder", self.order_fields(cart, urls))
            .await?;

        let redirect_url = order
            .redirect_url
            .ok_or_else(|| PaymentError::unavailable(PROVIDER, "order has no redirect URL"))?;
        let request_id = order.order_request_id.to_string();

        info!(order_request_id = %request_id, "Created SpectroCoin order");

        Ok(SessionOutcome::Opened(CheckoutSession::new(
            request_id,
            PaymentProvider::Spectrocoin,
            redirect_url,
        )))
    }

    #[instrument(skip(self, query))]
    async fn resolve_status(&self, query: StatusQuery<'_>) -> PaymentResult<Resolution> {
        match query {
            StatusQuery::Session { cart, .. } => {
                let mut fields = self.base_fields();
                fields.insert("orderId".to_string(), cart.id.clone());
                let order = self.post_signed("/api/merchant/1/getOrder", fields).await?;
                Ok(order.into_resolution())
            }
            StatusQuery::Callback(payload) => self.resolve_callback(payload),
        }
    }
}

// =============================================================================
// Status Mapping
// =============================================================================

/// 1 new, 2 pending, 3 paid, 4 failed, 5 expired, 6 test
fn order_status(code: u8) -> ResolvedStatus {
    match code {
        3 => ResolvedStatus::Paid,
        4 => ResolvedStatus::Failed,
        5 => ResolvedStatus::Canceled,
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

fn api_error(status: StatusCode, body: &str) -> PaymentError {
    let message = serde_json::from_str::<Vec<ApiError>>(body)
        .ok()
        .and_then(|errors| errors.into_iter().next())
        .map(|e| format!("{}: {}", e.code, e.message))
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));
    PaymentError::unavailable(PROVIDER, message)
}

// =============================================================================
// SpectroCoin API Types
// =============================================================================

/// Numbers arrive either bare or quoted
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(n) => write!(f, "{}", n),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Scalar,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MerchantOrder {
    order_request_id: Scalar,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<u8>,
    #[serde(default)]
    receive_amount: Option<Scalar>,
    #[serde(default)]
    receive_currency: Option<String>,
    #[serde(default)]
    redirect_url: Option<String>,
}

impl MerchantOrder {
    fn into_resolution(self) -> Resolution {
        let status = self.status.map(order_status).unwrap_or(ResolvedStatus::Unknown);
        let mut resolution =
            Resolution::new(status).with_reference(self.order_request_id.to_string());
        if let Some(cart_id) = self.order_id {
            resolution = resolution.with_cart_id(cart_id);
        }
        let amount = self
            .receive_currency
            .and_then(|c| c.parse::<Currency>().ok())
            .zip(self.receive_amount)
            .and_then(|(currency, value)| currency.parse_minor(&value.to_string()));
        if let Some(amount) = amount {
            resolution = resolution.with_amount(amount);
        }
        resolution
    }
}
