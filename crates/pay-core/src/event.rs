//! # Payment Events
//!
//! Outbound webhook payload. One immutable snapshot per qualifying
//! transition:
//!
//! ```json
//! {
//!   "event": "payment_initiation",
//!   "timestamp": 1700000000,
//!   "data": {
//!     "payment_system": "stripe",
//!     "payment_status": "new",
//!     "cart_id": "…",
//!     "total_amount": 2200,
//!     "currency": "USD",
//!     "cart_items": [{ "product_id": "x", "name": "X", "quantity": 2, "unit_amount": 500 }]
//!   }
//! }
//! ```

use crate::cart::{Cart, CartItem, PaymentProvider, PaymentStatus};
use crate::product::Currency;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Kind of transition the event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "payment_initiation")]
    Initiated,
    #[serde(rename = "payment_callback")]
    Callback,
    #[serde(rename = "payment_success")]
    Success,
    #[serde(rename = "payment_cancel")]
    Canceled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Initiated => "payment_initiation",
            EventKind::Callback => "payment_callback",
            EventKind::Success => "payment_success",
            EventKind::Canceled => "payment_cancel",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_amount: i64,
}

impl From<&CartItem> for EventItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_amount: item.unit_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub payment_system: PaymentProvider,
    pub payment_status: PaymentStatus,
    pub cart_id: String,
    pub total_amount: i64,
    pub currency: Currency,
    pub cart_items: Vec<EventItem>,
}

/// Webhook payload, built once from a committed cart snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event: EventKind,
    /// Unix seconds
    pub timestamp: i64,
    pub data: EventData,
}

impl PaymentEvent {
    pub fn from_cart(event: EventKind, cart: &Cart) -> Self {
        Self {
            event,
            timestamp: Utc::now().timestamp(),
            data: EventData {
                payment_system: cart.payment_provider,
                payment_status: cart.payment_status,
                cart_id: cart.id.clone(),
                total_amount: cart.amount_total,
                currency: cart.currency,
                cart_items: cart.items.iter().map(EventItem::from).collect(),
            },
        }
    }
}
