//! # pay-stripe
//!
//! Stripe adapter for litecart-pay-rs.
//!
//! Opens hosted Checkout Sessions, re-verifies success redirects against
//! the session retrieve API and authenticates webhook callbacks with the
//! `Stripe-Signature` HMAC.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pay_core::{BoxedProviderAdapter, ProviderRegistry};
//! use pay_stripe::StripeAdapter;
//!
//! let mut registry = ProviderRegistry::new();
//! if let Some(stripe) = StripeAdapter::from_env()? {
//!     registry.register(Arc::new(stripe) as BoxedProviderAdapter);
//! }
//! ```

pub mod checkout;
pub mod config;
pub mod signature;

// Re-exports
pub use checkout::StripeAdapter;
pub use config::StripeConfig;
pub use signature::{sign_payload, verify_signature, DEFAULT_TOLERANCE_SECS};
