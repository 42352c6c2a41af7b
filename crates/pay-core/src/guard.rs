//! # Idempotency Guard
//!
//! Callback and success-redirect are unordered, possibly duplicated signals
//! for the same cart. Status changes are therefore compare-and-set against
//! the stored status: exactly one caller observes `New` and wins the
//! transition, every other caller sees [`TransitionOutcome::Unchanged`].
//! Notifications fire only for [`TransitionOutcome::Applied`], which makes
//! fan-out at-most-once per (cart ID, terminal status).

use crate::cart::{Cart, PaymentProvider, PaymentStatus};
use crate::error::{PaymentError, PaymentResult};
use chrono::Utc;

/// Requested conditional update of a cart's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Target terminal status
    pub status: PaymentStatus,
    /// Provider reference to record; `None` or empty keeps the stored one
    pub provider_reference: Option<String>,
    /// Provider the signal came from, must match the cart
    pub provider: PaymentProvider,
}

impl StatusUpdate {
    pub fn new(status: PaymentStatus, provider: PaymentProvider) -> Self {
        Self {
            status,
            provider_reference: None,
            provider,
        }
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.provider_reference = reference;
        self
    }

    /// Non-empty reference, if any
    pub fn reference(&self) -> Option<&str> {
        self.provider_reference
            .as_deref()
            .filter(|r| !r.trim().is_empty())
    }
}

/// Result of a compare-and-set on a cart's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// This caller moved the cart out of `previous`
    Applied { previous: PaymentStatus, cart: Cart },
    /// The cart was already terminal; nothing was written
    Unchanged(Cart),
}

impl TransitionOutcome {
    /// Side effects belong to the caller that applied the transition, and only it
    pub fn should_notify(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn cart(&self) -> &Cart {
        match self {
            TransitionOutcome::Applied { cart, .. } => cart,
            TransitionOutcome::Unchanged(cart) => cart,
        }
    }

    pub fn into_cart(self) -> Cart {
        match self {
            TransitionOutcome::Applied { cart, .. } => cart,
            TransitionOutcome::Unchanged(cart) => cart,
        }
    }
}

/// Apply a status update to a cart held under the store's per-key lock.
///
/// Never reverts a terminal status and never clears a provider reference.
pub fn apply_transition(cart: &mut Cart, update: &StatusUpdate) -> PaymentResult<TransitionOutcome> {
    if !update.status.is_terminal() {
        return Err(PaymentError::Validation(format!(
            "cart {} cannot be moved to status {}",
            cart.id, update.status
        )));
    }

    if cart.payment_provider != update.provider {
        return Err(PaymentError::Validation(format!(
            "cart {} belongs to {}, not {}",
            cart.id, cart.payment_provider, update.provider
        )));
    }

    if !cart.payment_status.can_transition_to(update.status) {
        return Ok(TransitionOutcome::Unchanged(cart.clone()));
    }

    let previous = cart.payment_status;
    cart.payment_status = update.status;
    if let Some(reference) = update.reference() {
        cart.provider_reference = Some(reference.to_string());
    }
    cart.updated_at = Utc::now();

    Ok(TransitionOutcome::Applied {
        previous,
        cart: cart.clone(),
    })
}
