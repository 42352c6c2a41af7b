//! # pay-notify
//!
//! Concrete notification sinks for the [`pay_core::Notifier`]:
//! SMTP email through `lettre` and JSON webhooks through `reqwest`, plus
//! logging / no-op stand-ins for when either is not configured.

pub mod mail;
pub mod webhook;

pub use mail::{LogMailer, SmtpConfig, SmtpMailer};
pub use webhook::{HttpWebhookSink, NoopWebhookSink, DEFAULT_WEBHOOK_TIMEOUT};
