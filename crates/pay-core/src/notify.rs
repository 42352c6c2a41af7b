//! # Notification Fan-out
//!
//! Two independent, best-effort sinks fired after a cart transition has
//! committed: a transactional email ([`Mailer`]) and an outbound webhook
//! ([`WebhookSink`]). Both run concurrently and each failure is reported
//! on its own in a [`FanOutReport`]; nothing here can touch cart state.

use crate::cart::{Cart, PaymentStatus};
use crate::error::NotificationError;
use crate::event::{EventKind, PaymentEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// An email to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Letter {
    /// "Check your email to pay" notice sent at initiation
    Prepayment {
        to: String,
        /// Formatted amount, e.g. "22.00 USD"
        amount: String,
        payment_url: String,
    },
    /// Purchase receipt sent on the transition into PAID
    Receipt { cart: Cart },
}

impl Letter {
    pub fn recipient(&self) -> &str {
        match self {
            Letter::Prepayment { to, .. } => to,
            Letter::Receipt { cart } => &cart.email,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Letter::Prepayment { amount, .. } => format!("Your order: payment of {}", amount),
            Letter::Receipt { cart } => format!("Receipt for order {}", cart.id),
        }
    }

    /// Plain-text body
    pub fn body(&self) -> String {
        match self {
            Letter::Prepayment {
                amount,
                payment_url,
                ..
            } => format!(
                "Thank you for your order.\n\nAmount due: {}\n\nComplete your payment here:\n{}\n",
                amount, payment_url
            ),
            Letter::Receipt { cart } => {
                let mut body = format!("Thank you for your purchase.\n\nOrder: {}\n\n", cart.id);
                for item in &cart.items {
                    body.push_str(&format!(
                        "  {} x {} @ {}\n",
                        item.quantity,
                        item.name,
                        cart.currency.format_minor(item.unit_amount)
                    ));
                }
                body.push_str(&format!("\nTotal paid: {}\n", cart.amount_display()));
                body
            }
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, letter: &Letter) -> Result<(), NotificationError>;
}

#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Deliver one event. No retries.
    async fn deliver(&self, event: &PaymentEvent) -> Result<(), NotificationError>;
}

/// Outcome of one fan-out; empty means every sink succeeded
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    pub failures: Vec<NotificationError>,
}

impl FanOutReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, result: Result<(), NotificationError>) {
        if let Err(e) = result {
            warn!(channel = %e.channel, error = %e.message, "Notification failed");
            self.failures.push(e);
        }
    }

    /// First failure, if any
    pub fn into_result(self) -> Result<(), NotificationError> {
        match self.failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Dispatches email and webhook for a committed transition
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    webhooks: Arc<dyn WebhookSink>,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, webhooks: Arc<dyn WebhookSink>) -> Self {
        Self { mailer, webhooks }
    }

    /// Prepayment notice plus INITIATED webhook for a freshly created cart
    pub async fn initiated(&self, cart: &Cart, payment_url: &str) -> FanOutReport {
        let letter = Letter::Prepayment {
            to: cart.email.clone(),
            amount: cart.amount_display(),
            payment_url: payment_url.to_string(),
        };
        let event = PaymentEvent::from_cart(EventKind::Initiated, cart);

        let (mail, hook) = tokio::join!(self.mailer.send(&letter), self.webhooks.deliver(&event));

        let mut report = FanOutReport::default();
        report.record(mail);
        report.record(hook);
        report
    }

    /// Webhook of `kind` for a transition, plus the receipt when the cart is now PAID
    pub async fn transitioned(&self, kind: EventKind, cart: &Cart) -> FanOutReport {
        let event = PaymentEvent::from_cart(kind, cart);
        let mut report = FanOutReport::default();

        if cart.payment_status == PaymentStatus::Paid {
            let letter = Letter::Receipt { cart: cart.clone() };
            let (mail, hook) =
                tokio::join!(self.mailer.send(&letter), self.webhooks.deliver(&event));
            report.record(mail);
            report.record(hook);
        } else {
            report.record(self.webhooks.deliver(&event).await);
        }

        debug!(
            cart_id = %cart.id,
            event = %kind,
            failures = report.failures.len(),
            "Fan-out complete"
        );
        report
    }

    /// Receipt email only
    pub async fn receipt(&self, cart: &Cart) -> Result<(), NotificationError> {
        self.mailer
            .send(&Letter::Receipt { cart: cart.clone() })
            .await
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{CartItem, PaymentProvider};
    use crate::error::NotificationChannel;
    use crate::product::Currency;
    use crate::testing::{RecordingMailer, RecordingWebhooks};

    fn cart() -> Cart {
        Cart::new(
            "buyer@example.com",
            vec![CartItem {
                product_id: "x".into(),
                name: "X".into(),
                unit_amount: 500,
                quantity: 2,
                image_url: None,
            }],
            Currency::USD,
            PaymentProvider::Stripe,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_initiated_sends_notice_and_hook() {
        let mailer = RecordingMailer::new();
        let hooks = RecordingWebhooks::new();
        let notifier = Notifier::new(Arc::new(mailer.clone()), Arc::new(hooks.clone()));

        let report = notifier
            .initiated(&cart(), "https://pay.example.com/s/1")
            .await;

        assert!(report.is_clean());
        let letters = mailer.letters();
        assert_eq!(letters.len(), 1);
        assert!(matches!(
            &letters[0],
            Letter::Prepayment { amount, .. } if amount == "10.00 USD"
        ));
        assert_eq!(hooks.kinds(), vec![EventKind::Initiated]);
    }

    #[tokio::test]
    async fn test_receipt_only_for_paid() {
        let mailer = RecordingMailer::new();
        let hooks = RecordingWebhooks::new();
        let notifier = Notifier::new(Arc::new(mailer.clone()), Arc::new(hooks.clone()));

        let mut cart = cart();
        cart.payment_status = PaymentStatus::Canceled;
        notifier.transitioned(EventKind::Canceled, &cart).await;
        assert!(mailer.letters().is_empty());

        cart.payment_status = PaymentStatus::Paid;
        notifier.transitioned(EventKind::Callback, &cart).await;
        assert_eq!(mailer.letters().len(), 1);
        assert_eq!(
            hooks.kinds(),
            vec![EventKind::Canceled, EventKind::Callback]
        );
    }

    #[tokio::test]
    async fn test_failures_reported_individually() {
        let mailer = RecordingMailer::failing();
        let hooks = RecordingWebhooks::failing();
        let notifier = Notifier::new(Arc::new(mailer.clone()), Arc::new(hooks.clone()));

        let mut cart = cart();
        cart.payment_status = PaymentStatus::Paid;
        let report = notifier.transitioned(EventKind::Success, &cart).await;

        let channels: Vec<_> = report.failures.iter().map(|f| f.channel).collect();
        assert_eq!(
            channels,
            vec![NotificationChannel::Email, NotificationChannel::Webhook]
        );
    }

    #[test]
    fn test_receipt_body() {
        let letter = Letter::Receipt { cart: cart() };
        let body = letter.body();
        assert!(body.contains("2 x X @ 5.00"));
        assert!(body.contains("Total paid: 10.00 USD"));
        assert_eq!(letter.recipient(), "buyer@example.com");
    }
}
