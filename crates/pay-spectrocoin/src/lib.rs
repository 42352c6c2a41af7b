//! # pay-spectrocoin
//!
//! SpectroCoin crypto-payment adapter for litecart-pay-rs.
//!
//! Orders are created and queried with signed form posts; callbacks are
//! form-encoded and authenticated by their `sign` field.

pub mod checkout;
pub mod config;
pub mod sign;

pub use checkout::SpectrocoinAdapter;
pub use config::{SpectrocoinConfig, DEFAULT_API_BASE};
