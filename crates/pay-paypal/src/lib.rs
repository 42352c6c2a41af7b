//! # pay-paypal
//!
//! PayPal adapter for litecart-pay-rs, built on the Orders v2 REST API.
//!
//! Credentials come from [`PaypalConfig`]; the adapter obtains and caches
//! an OAuth client-credentials token itself.

pub mod checkout;
pub mod config;

pub use checkout::PaypalAdapter;
pub use config::{PaypalConfig, LIVE_API_BASE, SANDBOX_API_BASE};
