//! # Email
//!
//! [`SmtpMailer`] sends plain-text letters through an SMTP relay with
//! `lettre`. The transport is blocking, so each send runs on the blocking
//! pool. [`LogMailer`] stands in when no relay is configured.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use pay_core::{Letter, Mailer, NotificationError, PaymentError, PaymentResult};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,

    /// 465 uses implicit TLS, anything else STARTTLS
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Sender mailbox, e.g. `Shop <shop@example.com>`
    pub from: String,

    /// Plain connection without TLS (local relays only)
    pub insecure: bool,

    pub timeout: Duration,
}

impl SmtpConfig {
    /// Load from environment variables.
    ///
    /// Returns `Ok(None)` when `SMTP_HOST` is unset. `SMTP_FROM` is then
    /// required; `SMTP_PORT` defaults to 587 and `SMTP_TLS=false` disables TLS.
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let Some(host) = env::var("SMTP_HOST").ok().filter(|h| !h.is_empty()) else {
            return Ok(None);
        };

        let from = env::var("SMTP_FROM").map_err(|_| {
            PaymentError::Configuration("SMTP_FROM must be set when SMTP_HOST is".to_string())
        })?;

        let port = match env::var("SMTP_PORT") {
            Ok(p) => p
                .parse()
                .map_err(|_| PaymentError::Configuration(format!("invalid SMTP_PORT: {}", p)))?,
            Err(_) => 587,
        };

        Ok(Some(Self {
            host,
            port,
            username: env::var("SMTP_USERNAME").ok().filter(|s| !s.is_empty()),
            password: env::var("SMTP_PASSWORD").ok(),
            from,
            insecure: env::var("SMTP_TLS").map(|v| v == "false").unwrap_or(false),
            timeout: Duration::from_secs(10),
        }))
    }
}

/// Mailer backed by an SMTP relay
pub struct SmtpMailer {
    from: Mailbox,
    transport: Arc<SmtpTransport>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> PaymentResult<Self> {
        let from: Mailbox = config.from.parse().map_err(|e| {
            PaymentError::Configuration(format!("invalid SMTP_FROM {}: {}", config.from, e))
        })?;

        let builder = if config.insecure {
            SmtpTransport::builder_dangerous(&config.host)
        } else if config.port == 465 {
            SmtpTransport::relay(&config.host)
                .map_err(|e| PaymentError::Configuration(format!("SMTP relay: {}", e)))?
        } else {
            SmtpTransport::starttls_relay(&config.host)
                .map_err(|e| PaymentError::Configuration(format!("SMTP relay: {}", e)))?
        };

        let mut builder = builder.port(config.port).timeout(Some(config.timeout));
        if let Some(username) = &config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        info!(host = %config.host, port = config.port, "SMTP mailer configured");

        Ok(Self {
            from,
            transport: Arc::new(builder.build()),
        })
    }

    fn build_message(&self, letter: &Letter) -> Result<Message, NotificationError> {
        let to: Mailbox = letter.recipient().parse().map_err(|e| {
            NotificationError::email(format!("invalid recipient {}: {}", letter.recipient(), e))
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(letter.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(letter.body())
            .map_err(|e| NotificationError::email(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, letter), fields(to = %letter.recipient()))]
    async fn send(&self, letter: &Letter) -> Result<(), NotificationError> {
        let message = self.build_message(letter)?;
        let transport = Arc::clone(&self.transport);

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotificationError::email(format!("mail task failed: {}", e)))?
            .map_err(|e| NotificationError::email(e.to_string()))?;

        debug!("Email delivered");
        Ok(())
    }
}

/// Mailer that only logs; used when SMTP is not configured
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, letter: &Letter) -> Result<(), NotificationError> {
        info!(
            to = %letter.recipient(),
            subject = %letter.subject(),
            "Email not sent (SMTP not configured)"
        );
        Ok(())
    }
}
