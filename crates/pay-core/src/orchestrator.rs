//! # Payment Orchestrator
//!
//! Drives the four entry points through the cart state machine:
//!
//! ```text
//!            initiate
//!               │
//!               ▼
//!             NEW ──── callback / success / cancel ───► PAID | CANCELED | FAILED
//! ```
//!
//! Success is never taken from the redirect: every completion is
//! re-verified through the provider adapter before the store is touched.
//! The store's compare-and-set decides which caller owns the notifications.

use crate::adapter::{
    CallbackPayload, CheckoutUrls, ProviderRegistry, Resolution, SessionOutcome, StatusQuery,
};
use crate::cart::{Cart, CartItem, PaymentProvider, PaymentStatus};
use crate::error::{NotificationError, PaymentError, PaymentResult};
use crate::event::EventKind;
use crate::guard::{StatusUpdate, TransitionOutcome};
use crate::notify::{FanOutReport, Notifier};
use crate::product::{Currency, ProductCatalog};
use crate::store::BoxedCartStore;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default bound on every provider call
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Store currency; every catalog price must be in it
    pub currency: Currency,
    pub provider_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            currency: Currency::USD,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// One requested line; any client-side price is ignored by construction
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRequest {
    #[serde(alias = "id")]
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub email: String,
    pub provider: PaymentProvider,
    pub items: Vec<ItemRequest>,
}

/// Result of [`PaymentOrchestrator::initiate`]
#[derive(Debug, Clone)]
pub struct Initiated {
    /// Provider-hosted checkout URL, or the local cart page when disabled
    pub url: String,
    /// `None` when the provider is disabled and no cart was created
    pub cart_id: Option<String>,
    pub report: FanOutReport,
}

/// Result of a completion signal (callback, success or cancel)
#[derive(Debug, Clone)]
pub struct Completion {
    /// Cart as stored after the signal
    pub cart: Cart,
    /// Whether this signal performed the transition
    pub applied: bool,
    pub report: FanOutReport,
}

impl Completion {
    fn unchanged(cart: Cart) -> Self {
        Self {
            cart,
            applied: false,
            report: FanOutReport::default(),
        }
    }
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    registry: ProviderRegistry,
    store: BoxedCartStore,
    catalog: Arc<ProductCatalog>,
    notifier: Notifier,
    urls: CheckoutUrls,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        store: BoxedCartStore,
        catalog: Arc<ProductCatalog>,
        notifier: Notifier,
        urls: CheckoutUrls,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            catalog,
            notifier,
            urls,
            config,
        }
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn urls(&self) -> &CheckoutUrls {
        &self.urls
    }

    /// Registered providers with their active flag
    pub fn providers(&self) -> Vec<(PaymentProvider, bool)> {
        self.registry.providers()
    }

    pub async fn list_carts(&self) -> PaymentResult<Vec<Cart>> {
        self.store.list().await
    }

    pub async fn cart(&self, cart_id: &str) -> PaymentResult<Cart> {
        self.store.get(cart_id).await
    }

    // =========================================================================
    // Initiate
    // =========================================================================

    /// Price the cart from the catalog, open a provider session, persist the
    /// cart as NEW and announce it.
    #[instrument(skip(self, request), fields(provider = %request.provider, items = request.items.len()))]
    pub async fn initiate(&self, request: InitiateRequest) -> PaymentResult<Initiated> {
        let email = request.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(PaymentError::Validation("a valid email is required".into()));
        }

        let adapter = self.registry.get(request.provider).ok_or_else(|| {
            PaymentError::Validation(format!("payment system not available: {}", request.provider))
        })?;

        let items = self.price_items(&request.items)?;

        if !adapter.is_active() {
            info!(provider = %request.provider, "Provider disabled, falling back to cart page");
            return Ok(self.fallback());
        }

        let mut cart = Cart::new(email, items, self.config.currency, request.provider)
            .ok_or_else(|| PaymentError::Validation("cart total is out of range".into()))?;

        let urls = self.urls.for_cart(&cart.id, cart.payment_provider);
        let outcome = self
            .bounded(request.provider, adapter.create_session(&cart, &urls))
            .await?;

        let session = match outcome {
            SessionOutcome::Opened(session) => session,
            SessionOutcome::Disabled => {
                info!(provider = %request.provider, "Provider reported disabled, falling back to cart page");
                return Ok(self.fallback());
            }
        };

        cart.provider_reference = Some(session.session_id.clone());
        self.store.create(&cart).await?;

        info!(
            cart_id = %cart.id,
            amount_total = cart.amount_total,
            session_id = %session.session_id,
            "Cart created"
        );

        let notifier = self.notifier.clone();
        let announced = cart.clone();
        let payment_url = session.checkout_url.clone();
        let report =
            detached(async move { notifier.initiated(&announced, &payment_url).await }).await;

        Ok(Initiated {
            url: session.checkout_url,
            cart_id: Some(cart.id),
            report,
        })
    }

    fn fallback(&self) -> Initiated {
        Initiated {
            url: self.urls.cart_url(),
            cart_id: None,
            report: FanOutReport::default(),
        }
    }

    /// Merge duplicate products and price every line from the catalog.
    fn price_items(&self, requested: &[ItemRequest]) -> PaymentResult<Vec<CartItem>> {
        if requested.is_empty() {
            return Err(PaymentError::Validation("cart is empty".into()));
        }

        let mut merged: Vec<(String, u32)> = Vec::with_capacity(requested.len());
        for item in requested {
            if item.quantity == 0 {
                return Err(PaymentError::Validation(format!(
                    "quantity for {} must be at least 1",
                    item.product_id
                )));
            }
            match merged.iter_mut().find(|(id, _)| *id == item.product_id) {
                Some((_, qty)) => {
                    *qty = qty.checked_add(item.quantity).ok_or_else(|| {
                        PaymentError::Validation(format!(
                            "quantity for {} is too large",
                            item.product_id
                        ))
                    })?;
                }
                None => merged.push((item.product_id.clone(), item.quantity)),
            }
        }

        merged
            .into_iter()
            .map(|(product_id, quantity)| {
                let product = self
                    .catalog
                    .get(&product_id)
                    .ok_or_else(|| PaymentError::ProductNotFound {
                        product_id: product_id.clone(),
                    })?;
                if !product.active {
                    return Err(PaymentError::Validation(format!(
                        "product {} is not available",
                        product_id
                    )));
                }
                if product.price.currency != self.config.currency {
                    return Err(PaymentError::Validation(format!(
                        "product {} is priced in {}, store currency is {}",
                        product_id, product.price.currency, self.config.currency
                    )));
                }
                Ok(CartItem::from_product(product, quantity))
            })
            .collect()
    }

    // =========================================================================
    // Callback
    // =========================================================================

    /// Verify and apply a server-to-server notification.
    ///
    /// Duplicate deliveries are acknowledged without side effects. A verified
    /// event with no final status returns `Ok(None)` without looking up a
    /// cart, since providers send event types that carry none.
    #[instrument(skip(self, payload), fields(provider = %provider))]
    pub async fn handle_callback(
        &self,
        provider: PaymentProvider,
        cart_id: Option<&str>,
        payload: &CallbackPayload,
    ) -> PaymentResult<Option<Completion>> {
        let adapter = self.registry.get(provider).ok_or_else(|| {
            PaymentError::Validation(format!("payment system not available: {}", provider))
        })?;

        let resolution = self
            .bounded(provider, adapter.resolve_status(StatusQuery::Callback(payload)))
            .await?;

        if resolution.status.terminal().is_none() {
            debug!(cart_id = ?cart_id, "Callback carries no final status");
            return Ok(None);
        }

        let cart_id = match (cart_id.filter(|id| !id.is_empty()), resolution.cart_id.as_deref()) {
            (Some(query), Some(echoed)) if query != echoed => {
                return Err(PaymentError::rejected(
                    provider.as_str(),
                    format!("callback cart {} does not match {}", echoed, query),
                ));
            }
            (Some(query), _) => query.to_string(),
            (None, Some(echoed)) => echoed.to_string(),
            (None, None) => {
                return Err(PaymentError::Validation("callback carries no cart id".into()));
            }
        };

        let cart = self.store.get(&cart_id).await?;
        if cart.payment_provider != provider {
            return Err(PaymentError::Validation(format!(
                "cart {} was not paid with {}",
                cart.id, provider
            )));
        }
        check_amount(&cart, &resolution);

        self.commit(cart, provider, resolution, EventKind::Callback)
            .await
            .map(Some)
    }

    // =========================================================================
    // Success redirect
    // =========================================================================

    /// Re-verify a browser return against the provider's status API.
    #[instrument(skip(self, token), fields(provider = %provider))]
    pub async fn handle_success(
        &self,
        provider: PaymentProvider,
        cart_id: &str,
        token: Option<&str>,
    ) -> PaymentResult<Completion> {
        let cart = self.store.get(cart_id).await?;

        if cart.payment_provider != provider {
            return Err(PaymentError::Validation(format!(
                "cart {} was not paid with {}",
                cart.id, provider
            )));
        }

        if cart.payment_status.is_terminal() {
            debug!(cart_id = %cart.id, status = %cart.payment_status, "Cart already settled");
            return Ok(Completion::unchanged(cart));
        }

        let adapter = self.registry.get(provider).ok_or_else(|| {
            PaymentError::Validation(format!("payment system not available: {}", provider))
        })?;
        if !adapter.is_active() {
            return Err(PaymentError::ProviderDisabled {
                provider: provider.to_string(),
            });
        }

        let stored = cart.provider_reference.clone().filter(|r| !r.is_empty());
        let token = match (token.filter(|t| !t.is_empty()), stored) {
            (Some(given), Some(stored)) if given != stored => {
                return Err(PaymentError::rejected(
                    provider.as_str(),
                    format!("session {} does not belong to cart {}", given, cart.id),
                ));
            }
            (Some(given), _) => given.to_string(),
            (None, Some(stored)) => stored,
            (None, None) => {
                return Err(PaymentError::Validation(format!(
                    "cart {} has no provider session",
                    cart.id
                )));
            }
        };

        let resolution = self
            .bounded(
                provider,
                adapter.resolve_status(StatusQuery::Session {
                    cart: &cart,
                    token: &token,
                }),
            )
            .await?;

        if let Some(echoed) = resolution.cart_id.as_deref() {
            if echoed != cart.id {
                return Err(PaymentError::rejected(
                    provider.as_str(),
                    format!("session belongs to cart {}, not {}", echoed, cart.id),
                ));
            }
        }
        check_amount(&cart, &resolution);

        self.commit(cart, provider, resolution, EventKind::Success)
            .await
    }

    // =========================================================================
    // Cancel redirect
    // =========================================================================

    /// Close a cart the customer walked away from. Never overrides a
    /// terminal status.
    #[instrument(skip(self), fields(provider = %provider))]
    pub async fn handle_cancel(
        &self,
        provider: PaymentProvider,
        cart_id: &str,
    ) -> PaymentResult<Completion> {
        let cart = self.store.get(cart_id).await?;
        if cart.payment_provider != provider {
            warn!(
                cart_id = %cart.id,
                stored = %cart.payment_provider,
                given = %provider,
                "Cancel redirect names a different payment system"
            );
        }

        let update = StatusUpdate::new(PaymentStatus::Canceled, cart.payment_provider);
        let outcome = self.store.update_status(&cart.id, &update).await?;
        Ok(self.fan_out(outcome, EventKind::Canceled).await)
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// Send the receipt for a PAID cart again. No state change, no webhook.
    #[instrument(skip(self))]
    pub async fn resend_receipt(&self, cart_id: &str) -> PaymentResult<Cart> {
        let cart = self.store.get(cart_id).await?;
        if cart.payment_status != PaymentStatus::Paid {
            return Err(PaymentError::Validation(format!(
                "cart {} is {}, receipts are only sent for paid carts",
                cart.id, cart.payment_status
            )));
        }
        self.notifier.receipt(&cart).await?;
        info!(cart_id = %cart.id, "Receipt re-sent");
        Ok(cart)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn commit(
        &self,
        cart: Cart,
        provider: PaymentProvider,
        resolution: Resolution,
        kind: EventKind,
    ) -> PaymentResult<Completion> {
        let Some(status) = resolution.status.terminal() else {
            debug!(cart_id = %cart.id, "Provider has no final status yet");
            return Ok(Completion::unchanged(cart));
        };

        let update =
            StatusUpdate::new(status, provider).with_reference(resolution.provider_reference);
        let outcome = self.store.update_status(&cart.id, &update).await?;
        Ok(self.fan_out(outcome, kind).await)
    }

    async fn fan_out(&self, outcome: TransitionOutcome, kind: EventKind) -> Completion {
        match outcome {
            TransitionOutcome::Applied { previous, cart } => {
                info!(
                    cart_id = %cart.id,
                    from = %previous,
                    to = %cart.payment_status,
                    event = %kind,
                    "Cart status changed"
                );
                let notifier = self.notifier.clone();
                let announced = cart.clone();
                let report =
                    detached(async move { notifier.transitioned(kind, &announced).await }).await;
                Completion {
                    cart,
                    applied: true,
                    report,
                }
            }
            TransitionOutcome::Unchanged(cart) => {
                debug!(cart_id = %cart.id, status = %cart.payment_status, "Duplicate signal ignored");
                Completion::unchanged(cart)
            }
        }
    }

    /// Bound a provider call; an elapsed timer is `ProviderUnavailable`.
    async fn bounded<T>(
        &self,
        provider: PaymentProvider,
        call: impl Future<Output = PaymentResult<T>>,
    ) -> PaymentResult<T> {
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(provider = %provider, timeout = ?self.config.provider_timeout, "Provider call timed out");
                Err(PaymentError::unavailable(
                    provider.as_str(),
                    format!("no response within {:?}", self.config.provider_timeout),
                ))
            }
        }
    }
}

/// Run a fan-out on its own task so a dropped request cannot cancel
/// delivery for a transition that has already committed.
async fn detached(delivery: impl Future<Output = FanOutReport> + Send + 'static) -> FanOutReport {
    match tokio::spawn(delivery).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "Notification task aborted");
            let mut report = FanOutReport::default();
            report
                .failures
                .push(NotificationError::email(format!("notification task aborted: {}", e)));
            report
                .failures
                .push(NotificationError::webhook(format!("notification task aborted: {}", e)));
            report
        }
    }
}

fn check_amount(cart: &Cart, resolution: &Resolution) {
    if let Some(amount) = resolution.amount {
        if amount != cart.amount_total {
            warn!(
                cart_id = %cart.id,
                stored = cart.amount_total,
                reported = amount,
                "Provider amount differs from cart total"
            );
        }
    }
}

impl std::fmt::Debug for PaymentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentOrchestrator")
            .field("registry", &self.registry)
            .field("urls", &self.urls)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BoxedProviderAdapter, ResolvedStatus};
    use crate::product::{Price, Product};
    use crate::store::{CartStore, MemoryCartStore};
    use crate::testing::{
        FakeAdapter, RecordingMailer, RecordingWebhooks, FAKE_SIGNATURE_HEADER, FAKE_SIGNATURE_OK,
    };

    struct Harness {
        orchestrator: PaymentOrchestrator,
        store: MemoryCartStore,
        stripe: FakeAdapter,
        mailer: RecordingMailer,
        hooks: RecordingWebhooks,
    }

    fn catalog() -> ProductCatalog {
        ProductCatalog::new()
            .with_product(Product::new("x", "Product X", Price::from_cents(500, Currency::USD)))
            .with_product(Product::new("y", "Product Y", Price::from_cents(1200, Currency::USD)))
            .with_product(Product::new("z", "Retired", Price::from_cents(100, Currency::USD)).inactive())
            .with_product(Product::new("e", "Euro thing", Price::from_cents(100, Currency::EUR)))
    }

    fn harness_with(mailer: RecordingMailer, hooks: RecordingWebhooks) -> Harness {
        let store = MemoryCartStore::new();
        let stripe = FakeAdapter::new(PaymentProvider::Stripe);
        let paypal = FakeAdapter::new(PaymentProvider::Paypal).disabled();
        let registry = ProviderRegistry::new()
            .with_adapter(Arc::new(stripe.clone()) as BoxedProviderAdapter)
            .with_adapter(Arc::new(paypal) as BoxedProviderAdapter);

        let orchestrator = PaymentOrchestrator::new(
            registry,
            Arc::new(store.clone()),
            Arc::new(catalog()),
            Notifier::new(Arc::new(mailer.clone()), Arc::new(hooks.clone())),
            CheckoutUrls::new("https://shop.example.com"),
            OrchestratorConfig {
                currency: Currency::USD,
                provider_timeout: Duration::from_millis(200),
            },
        );

        Harness {
            orchestrator,
            store,
            stripe,
            mailer,
            hooks,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingMailer::new(), RecordingWebhooks::new())
    }

    fn request(items: &[(&str, u32)]) -> InitiateRequest {
        InitiateRequest {
            email: "buyer@example.com".into(),
            provider: PaymentProvider::Stripe,
            items: items
                .iter()
                .map(|(id, qty)| ItemRequest {
                    product_id: id.to_string(),
                    quantity: *qty,
                })
                .collect(),
        }
    }

    async fn initiated_cart(h: &Harness) -> Cart {
        let initiated = h.orchestrator.initiate(request(&[("x", 2), ("y", 1)])).await.unwrap();
        h.store.get(initiated.cart_id.as_deref().unwrap()).await.unwrap()
    }

    fn signed() -> CallbackPayload {
        CallbackPayload::new(b"{}".to_vec()).with_header(FAKE_SIGNATURE_HEADER, FAKE_SIGNATURE_OK)
    }

    #[tokio::test]
    async fn test_initiate_prices_from_catalog() {
        let h = harness();

        let initiated = h.orchestrator.initiate(request(&[("x", 2), ("y", 1)])).await.unwrap();

        let cart = h.store.get(initiated.cart_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(cart.amount_total, 2200);
        assert_eq!(cart.payment_status, PaymentStatus::New);
        assert_eq!(cart.provider_reference.as_deref(), Some("fake_sess_1"));
        assert!(initiated.url.starts_with("https://checkout.fake/fake_sess_1"));
        assert!(initiated.report.is_clean());

        let events = h.hooks.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventKind::Initiated);
        assert_eq!(events[0].data.total_amount, 2200);
        assert!(matches!(
            &h.mailer.letters()[0],
            crate::notify::Letter::Prepayment { amount, .. } if amount == "22.00 USD"
        ));
    }

    #[tokio::test]
    async fn test_initiate_merges_duplicate_products() {
        let h = harness();
        let cart_id = h
            .orchestrator
            .initiate(request(&[("x", 1), ("y", 1), ("x", 1)]))
            .await
            .unwrap()
            .cart_id
            .unwrap();

        let cart = h.store.get(&cart_id).await.unwrap();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.items[0].product_id, "x");
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.amount_total, 2200);
    }

    #[tokio::test]
    async fn test_initiate_validation() {
        let h = harness();

        let empty = h.orchestrator.initiate(request(&[])).await;
        assert!(matches!(empty, Err(PaymentError::Validation(_))));

        let zero = h.orchestrator.initiate(request(&[("x", 0)])).await;
        assert!(matches!(zero, Err(PaymentError::Validation(_))));

        let missing = h.orchestrator.initiate(request(&[("nope", 1)])).await;
        assert!(matches!(missing, Err(PaymentError::ProductNotFound { .. })));

        let inactive = h.orchestrator.initiate(request(&[("z", 1)])).await;
        assert!(matches!(inactive, Err(PaymentError::Validation(_))));

        let foreign = h.orchestrator.initiate(request(&[("e", 1)])).await;
        assert!(matches!(foreign, Err(PaymentError::Validation(_))));

        let mut bad_email = request(&[("x", 1)]);
        bad_email.email = "not-an-email".into();
        assert!(matches!(
            h.orchestrator.initiate(bad_email).await,
            Err(PaymentError::Validation(_))
        ));

        let mut unregistered = request(&[("x", 1)]);
        unregistered.provider = PaymentProvider::Spectrocoin;
        assert!(matches!(
            h.orchestrator.initiate(unregistered).await,
            Err(PaymentError::Validation(_))
        ));

        assert!(h.store.is_empty());
        assert_eq!(h.stripe.create_calls(), 0);
        assert!(h.hooks.events().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_disabled_provider_falls_back() {
        let h = harness();
        let mut req = request(&[("x", 1)]);
        req.provider = PaymentProvider::Paypal;

        let initiated = h.orchestrator.initiate(req).await.unwrap();

        assert_eq!(initiated.url, "https://shop.example.com/cart");
        assert!(initiated.cart_id.is_none());
        assert!(h.store.is_empty());
        assert!(h.hooks.events().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_provider_outage_creates_nothing() {
        let h = harness();
        h.stripe.fail_unavailable();

        let result = h.orchestrator.initiate(request(&[("x", 1)])).await;

        assert!(matches!(result, Err(PaymentError::ProviderUnavailable { .. })));
        assert!(h.store.is_empty());
        assert!(h.mailer.letters().is_empty());
    }

    #[tokio::test]
    async fn test_provider_timeout_is_unavailable() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.delay(Duration::from_secs(5));
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let result = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, None)
            .await;

        assert!(matches!(result, Err(PaymentError::ProviderUnavailable { .. })));
        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::New
        );
    }

    #[tokio::test]
    async fn test_duplicate_callback_notifies_once() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe
            .resolve_to(Resolution::new(ResolvedStatus::Paid).with_reference("pi_1"));

        let first = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &signed())
            .await
            .unwrap()
            .unwrap();
        let second = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &signed())
            .await
            .unwrap()
            .unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.cart.payment_status, PaymentStatus::Paid);
        assert_eq!(second.cart.provider_reference.as_deref(), Some("pi_1"));
        assert_eq!(
            h.hooks.kinds(),
            vec![EventKind::Initiated, EventKind::Callback]
        );
        assert_eq!(h.mailer.receipts(), 1);
    }

    #[tokio::test]
    async fn test_callback_cart_from_payload() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe
            .resolve_to(Resolution::new(ResolvedStatus::Failed).with_cart_id(cart.id.clone()));

        let completion = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, None, &signed())
            .await
            .unwrap()
            .unwrap();

        assert!(completion.applied);
        assert_eq!(completion.cart.payment_status, PaymentStatus::Failed);
        assert_eq!(h.mailer.receipts(), 0);
    }

    #[tokio::test]
    async fn test_callback_rejections_leave_cart_new() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let unsigned = CallbackPayload::new(b"{}".to_vec());
        let result = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &unsigned)
            .await;
        assert!(matches!(result, Err(PaymentError::ProviderRejected { .. })));

        h.stripe
            .resolve_to(Resolution::new(ResolvedStatus::Paid).with_cart_id("someone-else"));
        let result = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &signed())
            .await;
        assert!(matches!(result, Err(PaymentError::ProviderRejected { .. })));

        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::New
        );
        assert_eq!(h.hooks.kinds(), vec![EventKind::Initiated]);
    }

    #[tokio::test]
    async fn test_callback_unknown_is_acknowledged() {
        let h = harness();
        let cart = initiated_cart(&h).await;

        let completion = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &signed())
            .await
            .unwrap();

        assert!(completion.is_none());
        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::New
        );
    }

    #[tokio::test]
    async fn test_callback_unknown_without_cart_id_is_acknowledged() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Unknown));

        let completion = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, None, &signed())
            .await
            .unwrap();

        assert!(completion.is_none());
        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::New
        );
        assert_eq!(h.hooks.kinds(), vec![EventKind::Initiated]);
    }

    #[tokio::test]
    async fn test_callback_final_status_without_cart_id() {
        let h = harness();
        initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let result = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, None, &signed())
            .await;

        assert!(matches!(result, Err(PaymentError::Validation(_))));
    }

    #[tokio::test]
    async fn test_callback_adapter_rejection() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.fail_rejected();

        let callback = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &signed())
            .await;
        assert!(matches!(callback, Err(PaymentError::ProviderRejected { .. })));

        let success = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, None)
            .await;
        assert!(matches!(success, Err(PaymentError::ProviderRejected { .. })));

        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::New
        );
        assert_eq!(h.mailer.receipts(), 0);
    }

    #[tokio::test]
    async fn test_success_reverifies_and_notifies() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let completion = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, Some("fake_sess_1"))
            .await
            .unwrap();

        assert!(completion.applied);
        assert_eq!(completion.cart.payment_status, PaymentStatus::Paid);
        assert_eq!(h.stripe.resolve_calls(), 1);
        assert_eq!(h.mailer.receipts(), 1);
        assert_eq!(
            h.hooks.kinds(),
            vec![EventKind::Initiated, EventKind::Success]
        );

        // Reload of the success page: no provider call, no notifications.
        let again = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, Some("fake_sess_1"))
            .await
            .unwrap();
        assert!(!again.applied);
        assert_eq!(h.stripe.resolve_calls(), 1);
        assert_eq!(h.mailer.receipts(), 1);
    }

    #[tokio::test]
    async fn test_success_redirect_alone_is_not_payment() {
        let h = harness();
        let cart = initiated_cart(&h).await;

        let completion = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, None)
            .await
            .unwrap();

        assert!(!completion.applied);
        assert_eq!(completion.cart.payment_status, PaymentStatus::New);
        assert_eq!(h.mailer.receipts(), 0);
    }

    #[tokio::test]
    async fn test_success_rejects_foreign_session_and_provider() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let foreign = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, Some("cs_other"))
            .await;
        assert!(matches!(foreign, Err(PaymentError::ProviderRejected { .. })));

        let wrong_provider = h
            .orchestrator
            .handle_success(PaymentProvider::Paypal, &cart.id, None)
            .await;
        assert!(matches!(wrong_provider, Err(PaymentError::Validation(_))));

        assert_eq!(h.stripe.resolve_calls(), 0);
    }

    #[tokio::test]
    async fn test_success_missing_cart() {
        let h = harness();
        let result = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, "missing", None)
            .await;
        assert!(matches!(result, Err(PaymentError::CartNotFound { .. })));
    }

    #[tokio::test]
    async fn test_cancel_never_overrides_paid() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));
        h.orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &signed())
            .await
            .unwrap()
            .unwrap();

        let completion = h
            .orchestrator
            .handle_cancel(PaymentProvider::Stripe, &cart.id)
            .await
            .unwrap();

        assert!(!completion.applied);
        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
        assert!(!h.hooks.kinds().contains(&EventKind::Canceled));
    }

    #[tokio::test]
    async fn test_cancel_closes_new_cart() {
        let h = harness();
        let cart = initiated_cart(&h).await;

        let completion = h
            .orchestrator
            .handle_cancel(PaymentProvider::Stripe, &cart.id)
            .await
            .unwrap();
        assert!(completion.applied);
        assert_eq!(completion.cart.payment_status, PaymentStatus::Canceled);
        assert_eq!(
            h.hooks.kinds(),
            vec![EventKind::Initiated, EventKind::Canceled]
        );

        // A late success redirect on a canceled cart makes no provider call.
        let late = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, None)
            .await
            .unwrap();
        assert_eq!(late.cart.payment_status, PaymentStatus::Canceled);
        assert_eq!(h.stripe.resolve_calls(), 0);

        let missing = h.orchestrator.handle_cancel(PaymentProvider::Stripe, "nope").await;
        assert!(matches!(missing, Err(PaymentError::CartNotFound { .. })));
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_transition() {
        let h = harness_with(RecordingMailer::failing(), RecordingWebhooks::new());
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let completion = h
            .orchestrator
            .handle_callback(PaymentProvider::Stripe, Some(&cart.id), &signed())
            .await
            .unwrap()
            .unwrap();

        assert!(completion.applied);
        assert!(!completion.report.is_clean());
        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_dropped_request_still_sends_receipt() {
        let h = harness_with(
            RecordingMailer::new().with_delay(Duration::from_millis(200)),
            RecordingWebhooks::new(),
        );
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let dropped = tokio::time::timeout(
            Duration::from_millis(50),
            h.orchestrator
                .handle_success(PaymentProvider::Stripe, &cart.id, None),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(
            h.store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.mailer.receipts(), 1);
        assert_eq!(
            h.hooks.kinds(),
            vec![EventKind::Initiated, EventKind::Success]
        );

        let retry = h
            .orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, None)
            .await
            .unwrap();
        assert!(!retry.applied);
        assert_eq!(h.mailer.receipts(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_callback_and_success_notify_once() {
        let h = harness();
        let cart = initiated_cart(&h).await;
        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));

        let mut tasks = Vec::new();
        for i in 0..12 {
            let orchestrator = h.orchestrator.clone();
            let id = cart.id.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    orchestrator
                        .handle_callback(PaymentProvider::Stripe, Some(&id), &signed())
                        .await
                        .map(|completion| completion.is_some_and(|c| c.applied))
                } else {
                    orchestrator
                        .handle_success(PaymentProvider::Stripe, &id, None)
                        .await
                        .map(|completion| completion.applied)
                }
            }));
        }

        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(h.mailer.receipts(), 1);
        assert_eq!(h.hooks.events().len(), 2);
    }

    #[tokio::test]
    async fn test_resend_receipt() {
        let h = harness();
        let cart = initiated_cart(&h).await;

        let early = h.orchestrator.resend_receipt(&cart.id).await;
        assert!(matches!(early, Err(PaymentError::Validation(_))));

        h.stripe.resolve_to(Resolution::new(ResolvedStatus::Paid));
        h.orchestrator
            .handle_success(PaymentProvider::Stripe, &cart.id, None)
            .await
            .unwrap();
        h.orchestrator.resend_receipt(&cart.id).await.unwrap();

        assert_eq!(h.mailer.receipts(), 2);
        assert_eq!(h.hooks.events().len(), 2);
    }
}
