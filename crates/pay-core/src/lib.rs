//! # pay-core
//!
//! Core types and traits for the litecart payment engine.
//!
//! This crate provides:
//! - `Cart`, `PaymentStatus` and `PaymentProvider` for the cart lifecycle
//! - `ProviderAdapter` trait and `ProviderRegistry` for payment providers
//! - `CartStore` trait with an in-memory implementation
//! - `TransitionOutcome`, the compare-and-set result that gates notifications
//! - `Notifier` with the `Mailer` and `WebhookSink` seams
//! - `PaymentOrchestrator`, which drives initiate, callback, success and cancel
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use pay_core::{InitiateRequest, ItemRequest, PaymentOrchestrator, PaymentProvider};
//!
//! let initiated = orchestrator
//!     .initiate(InitiateRequest {
//!         email: "buyer@example.com".into(),
//!         provider: PaymentProvider::Stripe,
//!         items: vec![ItemRequest { product_id: "ebook".into(), quantity: 1 }],
//!     })
//!     .await?;
//!
//! // Redirect the customer to initiated.url
//! ```

pub mod adapter;
pub mod cart;
pub mod error;
pub mod event;
pub mod guard;
pub mod notify;
pub mod orchestrator;
pub mod product;
pub mod secret;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use adapter::{
    BoxedProviderAdapter, CallbackPayload, CheckoutSession, CheckoutUrls, ProviderAdapter,
    ProviderRegistry, Resolution, ResolvedStatus, SessionOutcome, SessionUrls, StatusQuery,
};
pub use cart::{Cart, CartItem, PaymentProvider, PaymentStatus};
pub use error::{NotificationChannel, NotificationError, PaymentError, PaymentResult};
pub use event::{EventData, EventItem, EventKind, PaymentEvent};
pub use guard::{StatusUpdate, TransitionOutcome};
pub use notify::{FanOutReport, Letter, Mailer, Notifier, WebhookSink};
pub use orchestrator::{
    Completion, InitiateRequest, Initiated, ItemRequest, OrchestratorConfig, PaymentOrchestrator,
    DEFAULT_PROVIDER_TIMEOUT,
};
pub use product::{Currency, Price, Product, ProductCatalog, ProductType};
pub use secret::constant_time_compare;
pub use store::{BoxedCartStore, CartStore, MemoryCartStore};
