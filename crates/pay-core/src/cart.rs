//! # Cart Types
//!
//! The cart is the unit of purchase: priced product lines plus the payment
//! metadata that the orchestrator reconciles across providers.

use crate::product::{Currency, Product};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Payment providers known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Paypal,
    Spectrocoin,
}

impl PaymentProvider {
    pub const ALL: [PaymentProvider; 3] = [
        PaymentProvider::Stripe,
        PaymentProvider::Paypal,
        PaymentProvider::Spectrocoin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Paypal => "paypal",
            PaymentProvider::Spectrocoin => "spectrocoin",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(PaymentProvider::Stripe),
            "paypal" => Ok(PaymentProvider::Paypal),
            "spectrocoin" => Ok(PaymentProvider::Spectrocoin),
            other => Err(format!("unknown payment system: {}", other)),
        }
    }
}

/// Stored payment status of a cart.
///
/// `New` is the only non-terminal state; every other state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    New,
    Paid,
    Canceled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::New => "new",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::New)
    }

    /// Forward-only transition table: `New -> {Paid | Canceled | Failed}`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(self, PaymentStatus::New) && next.is_terminal()
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(PaymentStatus::New),
            "paid" => Ok(PaymentStatus::Paid),
            "canceled" => Ok(PaymentStatus::Canceled),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// A priced line in a cart, snapshotted from the catalog at initiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product ID
    pub product_id: String,

    /// Product name (denormalized for receipts and webhooks)
    pub name: String,

    /// Unit price in minor units, taken from the catalog
    pub unit_amount: i64,

    /// Quantity, always >= 1
    pub quantity: u32,

    /// Optional image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl CartItem {
    /// Create a line item from a catalog product
    pub fn from_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_amount: product.price.amount,
            quantity,
            image_url: product.image_url.clone(),
        }
    }

    /// Line total, `None` on overflow
    pub fn total(&self) -> Option<i64> {
        self.unit_amount.checked_mul(i64::from(self.quantity))
    }
}

/// A cart as persisted by the cart store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Opaque unique ID, the cross-provider correlation key
    pub id: String,

    /// Purchaser contact for receipts
    pub email: String,

    /// Priced items
    pub items: Vec<CartItem>,

    /// Server-computed total in minor units, immutable after initiation
    pub amount_total: i64,

    /// Currency, fixed at initiation
    pub currency: Currency,

    /// Provider chosen at initiation
    pub payment_provider: PaymentProvider,

    /// Current payment status
    pub payment_status: PaymentStatus,

    /// Provider-assigned session/order reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Build a new cart in status `New`. Returns `None` if the total overflows.
    pub fn new(
        email: impl Into<String>,
        items: Vec<CartItem>,
        currency: Currency,
        payment_provider: PaymentProvider,
    ) -> Option<Self> {
        let amount_total = items
            .iter()
            .try_fold(0_i64, |acc, item| acc.checked_add(item.total()?))?;
        let now = Utc::now();

        Some(Self {
            id: Uuid::new_v4().simple().to_string(),
            email: email.into(),
            items,
            amount_total,
            currency,
            payment_provider,
            payment_status: PaymentStatus::New,
            provider_reference: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Total formatted for humans, e.g. "22.00 USD"
    pub fn amount_display(&self) -> String {
        format!(
            "{} {}",
            self.currency.format_minor(self.amount_total),
            self.currency
        )
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::Price;

    fn item(id: &str, unit: i64, qty: u32) -> CartItem {
        CartItem::from_product(
            &Product::new(id, id.to_uppercase(), Price::from_cents(unit, Currency::USD)),
            qty,
        )
    }

    #[test]
    fn test_cart_total() {
        let cart = Cart::new(
            "buyer@example.com",
            vec![item("x", 500, 2), item("y", 1200, 1)],
            Currency::USD,
            PaymentProvider::Stripe,
        )
        .unwrap();

        assert_eq!(cart.amount_total, 2200);
        assert_eq!(cart.payment_status, PaymentStatus::New);
        assert_eq!(cart.item_count(), 3);
        assert_eq!(cart.amount_display(), "22.00 USD");
        assert_eq!(cart.id.len(), 32);
    }

    #[test]
    fn test_cart_total_overflow() {
        let cart = Cart::new(
            "buyer@example.com",
            vec![item("x", i64::MAX, 2)],
            Currency::USD,
            PaymentProvider::Stripe,
        );
        assert!(cart.is_none());
    }

    #[test]
    fn test_transition_table() {
        use PaymentStatus::*;

        for next in [Paid, Canceled, Failed] {
            assert!(New.can_transition_to(next));
        }
        assert!(!New.can_transition_to(New));
        for from in [Paid, Canceled, Failed] {
            for next in [New, Paid, Canceled, Failed] {
                assert!(!from.can_transition_to(next), "{from} -> {next}");
            }
        }
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("Stripe".parse::<PaymentProvider>(), Ok(PaymentProvider::Stripe));
        assert_eq!(
            "spectrocoin".parse::<PaymentProvider>(),
            Ok(PaymentProvider::Spectrocoin)
        );
        assert!("bitpay".parse::<PaymentProvider>().is_err());
        assert_eq!(
            serde_json::to_string(&PaymentProvider::Paypal).unwrap(),
            "\"paypal\""
        );
    }
}
