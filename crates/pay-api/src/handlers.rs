//! # Request Handlers
//!
//! JSON endpoints answer with a `{status, message, data}` envelope. The
//! provider callback answers with a plain `*ok*`. The browser return legs
//! render a page or redirect to the storefront root.

use crate::state::AppState;
use crate::views;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use pay_core::{
    constant_time_compare, CallbackPayload, Completion, InitiateRequest, ItemRequest, PaymentError,
    PaymentProvider, PaymentStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

/// Fixed acknowledgement for provider callbacks
pub const CALLBACK_ACK: &str = "*ok*";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, data: Option<T>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                status: status.as_u16(),
                message: message.into(),
                data,
            }),
        )
    }
}

type ErrorResponse = (StatusCode, Json<Envelope<()>>);

fn payment_error_to_response(err: PaymentError) -> ErrorResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    Envelope::new(status, err.to_string(), None)
}

/// Initiate request body
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub email: String,
    pub provider: String,
    #[serde(alias = "items")]
    pub products: Vec<ItemRequest>,
}

#[derive(Debug, Serialize)]
pub struct PaymentUrl {
    pub url: String,
    pub cart_id: Option<String>,
}

/// Query carried by provider return URLs
#[derive(Debug, Default, Deserialize)]
pub struct ReturnQuery {
    pub cart_id: Option<String>,
    pub payment_system: Option<String>,
    /// Stripe session ID
    pub session: Option<String>,
    /// PayPal order ID
    pub token: Option<String>,
}

impl ReturnQuery {
    fn provider(&self) -> Result<PaymentProvider, PaymentError> {
        let name = self
            .payment_system
            .as_deref()
            .ok_or_else(|| PaymentError::Validation("payment_system is required".into()))?;
        name.parse().map_err(PaymentError::Validation)
    }

    fn cart_id(&self) -> Option<&str> {
        self.cart_id.as_deref().filter(|id| !id.is_empty())
    }

    fn session_token(&self) -> Option<&str> {
        self.session.as_deref().or(self.token.as_deref())
    }
}

// =============================================================================
// Service
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "litecart-pay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Fallback page for a disabled provider
pub async fn cart_page() -> Html<String> {
    views::cart()
}

// =============================================================================
// Products
// =============================================================================

/// Active products
pub async fn list_products(State(state): State<AppState>) -> impl IntoResponse {
    let products: Vec<_> = state.orchestrator.catalog().active_products().collect();
    Json(serde_json::json!({
        "products": products,
        "count": products.len()
    }))
}

/// Get single product
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let product = state
        .orchestrator
        .catalog()
        .get(&product_id)
        .ok_or_else(|| payment_error_to_response(PaymentError::ProductNotFound { product_id }))?;

    Ok(Json(product.clone()))
}

// =============================================================================
// Payment
// =============================================================================

/// Registered providers and whether each is switched on
pub async fn payment_list(State(state): State<AppState>) -> impl IntoResponse {
    let providers: BTreeMap<String, bool> = state
        .orchestrator
        .providers()
        .into_iter()
        .map(|(provider, active)| (provider.to_string(), active))
        .collect();
    Envelope::new(StatusCode::OK, "Payment list", Some(providers))
}

/// Price the cart and open a provider checkout
#[instrument(skip(state, request), fields(provider = %request.provider, items = request.products.len()))]
pub async fn payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let provider: PaymentProvider = request
        .provider
        .parse()
        .map_err(|e| payment_error_to_response(PaymentError::Validation(e)))?;

    let initiated = state
        .orchestrator
        .initiate(InitiateRequest {
            email: request.email,
            provider,
            items: request.products,
        })
        .await
        .map_err(payment_error_to_response)?;

    let data = Some(PaymentUrl {
        url: initiated.url,
        cart_id: initiated.cart_id,
    });

    match initiated.report.into_result() {
        Ok(()) => Ok(Envelope::new(StatusCode::OK, "Payment url", data)),
        Err(e) => {
            error!("Initiation notifications failed: {}", e);
            Ok(Envelope::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), data))
        }
    }
}

/// Server-to-server provider notification
#[instrument(skip(state, headers, body), fields(cart_id = ?query.cart_id))]
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<ReturnQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = match query.provider() {
        Ok(provider) => provider,
        Err(e) => return plain(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let mut payload = CallbackPayload::new(body.to_vec());
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            payload = payload.with_header(name.as_str(), value);
        }
    }

    match state
        .orchestrator
        .handle_callback(provider, query.cart_id(), &payload)
        .await
    {
        Ok(None) => plain(StatusCode::OK, CALLBACK_ACK),
        Ok(Some(completion)) => match completion.report.into_result() {
            Ok(()) => plain(StatusCode::OK, CALLBACK_ACK),
            Err(e) => plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(e) => {
            warn!("Callback not applied: {}", e);
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            plain(status, e.to_string())
        }
    }
}

/// Browser return after checkout; status is re-verified with the provider
#[instrument(skip(state), fields(cart_id = ?query.cart_id))]
pub async fn payment_success(
    State(state): State<AppState>,
    Query(query): Query<ReturnQuery>,
) -> Response {
    let Some(cart_id) = query.cart_id() else {
        return plain(StatusCode::BAD_REQUEST, "cart_id is required");
    };
    let provider = match query.provider() {
        Ok(provider) => provider,
        Err(e) => return browser_error(e),
    };

    match state
        .orchestrator
        .handle_success(provider, cart_id, query.session_token())
        .await
    {
        Ok(completion) => completion_view(completion),
        Err(e) => browser_error(e),
    }
}

/// Browser return through the provider's cancel link
#[instrument(skip(state), fields(cart_id = ?query.cart_id))]
pub async fn payment_cancel(
    State(state): State<AppState>,
    Query(query): Query<ReturnQuery>,
) -> Response {
    let Some(cart_id) = query.cart_id() else {
        return plain(StatusCode::BAD_REQUEST, "cart_id is required");
    };
    let provider = match query.provider() {
        Ok(provider) => provider,
        Err(e) => return browser_error(e),
    };

    match state.orchestrator.handle_cancel(provider, cart_id).await {
        Ok(completion) => completion_view(completion),
        Err(e) => browser_error(e),
    }
}

fn completion_view(completion: Completion) -> Response {
    let page = match completion.cart.payment_status {
        PaymentStatus::Paid => views::success(&completion.cart),
        PaymentStatus::Canceled | PaymentStatus::Failed => views::cancel(),
        PaymentStatus::New => views::processing(&completion.cart),
    };

    match completion.report.into_result() {
        Ok(()) => page.into_response(),
        Err(e) => {
            error!(cart_id = %completion.cart.id, "Notification failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, page).into_response()
        }
    }
}

/// Degrade a failed browser leg to a storefront page
fn browser_error(err: PaymentError) -> Response {
    match err {
        PaymentError::CartNotFound { .. } => {
            (StatusCode::NOT_FOUND, views::not_found()).into_response()
        }
        PaymentError::Validation(_) | PaymentError::ProviderRejected { .. } => {
            warn!("Return leg refused: {}", err);
            Redirect::to("/").into_response()
        }
        other => {
            error!("Return leg failed: {}", other);
            Redirect::to("/").into_response()
        }
    }
}

fn plain(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.into(),
    )
        .into_response()
}

// =============================================================================
// Admin
// =============================================================================

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ErrorResponse> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(Envelope::new(StatusCode::NOT_FOUND, "Not found", None));
    };

    let given = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match given {
        Some(token) if constant_time_compare(token, expected) => Ok(()),
        _ => Err(Envelope::new(StatusCode::UNAUTHORIZED, "Unauthorized", None)),
    }
}

/// Every stored cart, most recent first
pub async fn list_carts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ErrorResponse> {
    authorize(&state, &headers)?;
    let carts = state
        .orchestrator
        .list_carts()
        .await
        .map_err(payment_error_to_response)?;
    Ok(Envelope::new(StatusCode::OK, "Carts", Some(carts)))
}

/// Re-send the receipt for a paid cart
#[instrument(skip(state, headers))]
pub async fn cart_send_mail(
    State(state): State<AppState>,
    Path(cart_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ErrorResponse> {
    authorize(&state, &headers)?;
    let cart = state
        .orchestrator
        .resend_receipt(&cart_id)
        .await
        .map_err(payment_error_to_response)?;
    info!(cart_id = %cart.id, "Receipt re-sent by admin");
    Ok(Envelope::new(
        StatusCode::OK,
        "Mail sent",
        Some(serde_json::json!({ "cart_id": cart.id })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_error_conversion() {
        let (status, Json(body)) =
            payment_error_to_response(PaymentError::Validation("bad email".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.status, 400);
        assert!(body.message.contains("bad email"));

        let (status, _) = payment_error_to_response(PaymentError::unavailable("stripe", "down"));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_return_query() {
        let query = ReturnQuery {
            cart_id: Some(String::new()),
            payment_system: Some("paypal".to_string()),
            session: None,
            token: Some("ORDER-1".to_string()),
        };
        assert_eq!(query.cart_id(), None);
        assert_eq!(query.provider().unwrap(), PaymentProvider::Paypal);
        assert_eq!(query.session_token(), Some("ORDER-1"));

        let unknown = ReturnQuery {
            payment_system: Some("bitpay".to_string()),
            ..ReturnQuery::default()
        };
        assert!(matches!(unknown.provider(), Err(PaymentError::Validation(_))));
        assert!(ReturnQuery::default().provider().is_err());
    }

    #[test]
    fn test_browser_error_mapping() {
        let not_found = browser_error(PaymentError::CartNotFound {
            cart_id: "c".to_string(),
        });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let rejected = browser_error(PaymentError::rejected("stripe", "forged"));
        assert_eq!(rejected.status(), StatusCode::SEE_OTHER);
        assert_eq!(rejected.headers()[header::LOCATION], "/");

        let outage = browser_error(PaymentError::unavailable("stripe", "down"));
        assert_eq!(outage.status(), StatusCode::SEE_OTHER);
    }
}
