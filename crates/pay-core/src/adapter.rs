//! # Provider Adapter Trait
//!
//! Uniform interface over the payment providers. Each provider implements
//! [`ProviderAdapter`] and is registered once in a [`ProviderRegistry`] keyed
//! by [`PaymentProvider`], so adding a provider never touches the
//! orchestrator's entry points.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ProviderAdapter (trait)                    │
//! │  ├── create_session()   cart -> hosted checkout URL         │
//! │  ├── resolve_status()   token / callback -> PAID|CANCELED.. │
//! │  └── provider()                                             │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!          ┌─────────────────┼─────────────────┐
//!          │                 │                 │
//!  ┌───────┴───────┐ ┌───────┴───────┐ ┌───────┴───────┐
//!  │ StripeAdapter │ │ PaypalAdapter │ │SpectrocoinAdap│
//!  └───────────────┘ └───────────────┘ └───────────────┘
//! ```

use crate::cart::{Cart, PaymentProvider, PaymentStatus};
use crate::error::PaymentResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A hosted checkout session opened by a provider.
///
/// Transient: never persisted, only its `session_id` survives as the cart's
/// provider reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session / order ID
    pub session_id: String,

    /// Provider that opened the session
    pub provider: PaymentProvider,

    /// URL to redirect customer to for payment
    pub checkout_url: String,

    /// When the session expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CheckoutSession {
    pub fn new(
        session_id: impl Into<String>,
        provider: PaymentProvider,
        checkout_url: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            provider,
            checkout_url: checkout_url.into(),
            expires_at: None,
        }
    }
}

/// Result of asking an adapter to open a session
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// Session opened, redirect the customer
    Opened(CheckoutSession),
    /// Provider is switched off; the caller falls back to the cart page
    Disabled,
}

/// Return legs a provider should send the customer (or its servers) to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUrls {
    pub callback_url: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Configuration for URLs used in checkout
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the storefront (e.g., "https://shop.example.com")
    pub base_url: String,
    /// Server-to-server callback path
    pub callback_path: String,
    /// Success redirect path
    pub success_path: String,
    /// Cancel redirect path
    pub cancel_path: String,
    /// Storefront cart page, used when a provider is disabled
    pub cart_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            callback_path: "/cart/payment/callback".to_string(),
            success_path: "/cart/payment/success".to_string(),
            cancel_path: "/cart/payment/cancel".to_string(),
            cart_path: "/cart".to_string(),
        }
    }

    /// Fallback "view cart" URL
    pub fn cart_url(&self) -> String {
        format!("{}{}", self.base_url, self.cart_path)
    }

    /// Return URLs carrying the cart correlation parameters
    pub fn for_cart(&self, cart_id: &str, provider: PaymentProvider) -> SessionUrls {
        let query = format!("cart_id={}&payment_system={}", cart_id, provider);
        SessionUrls {
            callback_url: format!("{}{}?{}", self.base_url, self.callback_path, query),
            success_url: format!("{}{}?{}", self.base_url, self.success_path, query),
            cancel_url: format!("{}{}?{}", self.base_url, self.cancel_path, query),
        }
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// Raw inbound server-to-server notification
#[derive(Debug, Clone, Default)]
pub struct CallbackPayload {
    /// Request headers, names lowercased
    pub headers: BTreeMap<String, String>,
    /// Raw body bytes, exactly as received (signatures cover these)
    pub body: Vec<u8>,
}

impl CallbackPayload {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

/// Provider-specific correlation data handed to [`ProviderAdapter::resolve_status`]
#[derive(Debug, Clone, Copy)]
pub enum StatusQuery<'a> {
    /// Re-verify a cart against the provider's status API
    Session {
        cart: &'a Cart,
        /// Session token from the redirect, or the stored provider reference
        token: &'a str,
    },
    /// Verify and interpret an asynchronous callback
    Callback(&'a CallbackPayload),
}

/// Normalized provider outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedStatus {
    Paid,
    Canceled,
    Failed,
    Unknown,
}

impl ResolvedStatus {
    /// The terminal cart status this outcome moves a cart to, if any
    pub fn terminal(&self) -> Option<PaymentStatus> {
        match self {
            ResolvedStatus::Paid => Some(PaymentStatus::Paid),
            ResolvedStatus::Canceled => Some(PaymentStatus::Canceled),
            ResolvedStatus::Failed => Some(PaymentStatus::Failed),
            ResolvedStatus::Unknown => None,
        }
    }
}

/// What an adapter learned from the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: ResolvedStatus,
    /// Provider session/order/payment reference
    pub provider_reference: Option<String>,
    /// Cart ID echoed back by the provider, when it carries one
    pub cart_id: Option<String>,
    /// Amount the provider reports, in minor units
    pub amount: Option<i64>,
}

impl Resolution {
    pub fn new(status: ResolvedStatus) -> Self {
        Self {
            status,
            provider_reference: None,
            cart_id: None,
            amount: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.provider_reference = Some(reference.into());
        self
    }

    pub fn with_cart_id(mut self, cart_id: impl Into<String>) -> Self {
        self.cart_id = Some(cart_id.into());
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Core trait for payment provider implementations.
///
/// Status-code vocabulary is provider specific; every adapter maps it to
/// [`ResolvedStatus`] in exactly one place.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter speaks for.
    fn provider(&self) -> PaymentProvider;

    /// Whether the provider is switched on.
    fn is_active(&self) -> bool {
        true
    }

    /// Open a hosted checkout session for a priced cart.
    ///
    /// Returns [`SessionOutcome::Disabled`] when the provider is switched off.
    async fn create_session(&self, cart: &Cart, urls: &SessionUrls)
        -> PaymentResult<SessionOutcome>;

    /// Resolve a completion query into a normalized status.
    ///
    /// Callback payloads must be authenticated before they are interpreted;
    /// failures are `ProviderRejected`, remote failures `ProviderUnavailable`.
    async fn resolve_status(&self, query: StatusQuery<'_>) -> PaymentResult<Resolution>;
}

/// Type alias for a shared adapter (dynamic dispatch)
pub type BoxedProviderAdapter = Arc<dyn ProviderAdapter>;

/// Adapter set keyed by provider, registered once at startup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<PaymentProvider, BoxedProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any adapter for the same provider
    pub fn register(&mut self, adapter: BoxedProviderAdapter) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Register with builder pattern
    pub fn with_adapter(mut self, adapter: BoxedProviderAdapter) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Option<&BoxedProviderAdapter> {
        self.adapters.get(&provider)
    }

    /// Registered providers with their active flag, in stable order
    pub fn providers(&self) -> Vec<(PaymentProvider, bool)> {
        let mut list: Vec<_> = self
            .adapters
            .iter()
            .map(|(p, a)| (*p, a.is_active()))
            .collect();
        list.sort();
        list
    }

    pub fn has_provider(&self, provider: PaymentProvider) -> bool {
        self.adapters.contains_key(&provider)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
