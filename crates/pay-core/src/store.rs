//! # Cart Store
//!
//! Durable record of carts and their payment status; the single source of
//! truth the orchestrator reconciles against. Implementations must make
//! [`CartStore::update_status`] atomic per cart ID.

use crate::cart::Cart;
use crate::error::{PaymentError, PaymentResult};
use crate::guard::{apply_transition, StatusUpdate, TransitionOutcome};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Persist a new cart. Fails with `DuplicateCart` if the ID exists.
    async fn create(&self, cart: &Cart) -> PaymentResult<()>;

    /// Fetch a cart. Fails with `CartNotFound` if absent.
    async fn get(&self, cart_id: &str) -> PaymentResult<Cart>;

    /// Conditionally move a `New` cart to a terminal status.
    async fn update_status(
        &self,
        cart_id: &str,
        update: &StatusUpdate,
    ) -> PaymentResult<TransitionOutcome>;

    /// All carts, most recent first
    async fn list(&self) -> PaymentResult<Vec<Cart>>;
}

pub type BoxedCartStore = Arc<dyn CartStore>;

/// In-process store; per-key atomicity comes from the map's shard locks
#[derive(Debug, Default, Clone)]
pub struct MemoryCartStore {
    carts: Arc<DashMap<String, Cart>>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.carts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carts.is_empty()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn create(&self, cart: &Cart) -> PaymentResult<()> {
        match self.carts.entry(cart.id.clone()) {
            Entry::Occupied(_) => Err(PaymentError::DuplicateCart {
                cart_id: cart.id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(cart.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, cart_id: &str) -> PaymentResult<Cart> {
        self.carts
            .get(cart_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| PaymentError::CartNotFound {
                cart_id: cart_id.to_string(),
            })
    }

    async fn update_status(
        &self,
        cart_id: &str,
        update: &StatusUpdate,
    ) -> PaymentResult<TransitionOutcome> {
        // The write guard is held for the whole compare-and-set.
        let mut entry = self
            .carts
            .get_mut(cart_id)
            .ok_or_else(|| PaymentError::CartNotFound {
                cart_id: cart_id.to_string(),
            })?;
        apply_transition(entry.value_mut(), update)
    }

    async fn list(&self) -> PaymentResult<Vec<Cart>> {
        let mut carts: Vec<Cart> = self.carts.iter().map(|c| c.value().clone()).collect();
        carts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(carts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{CartItem, PaymentProvider, PaymentStatus};
    use crate::product::Currency;

    fn cart() -> Cart {
        Cart::new(
            "buyer@example.com",
            vec![CartItem {
                product_id: "x".into(),
                name: "X".into(),
                unit_amount: 250,
                quantity: 2,
                image_url: None,
            }],
            Currency::USD,
            PaymentProvider::Paypal,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryCartStore::new();
        let cart = cart();

        store.create(&cart).await.unwrap();
        assert_eq!(store.get(&cart.id).await.unwrap(), cart);

        let dup = store.create(&cart).await;
        assert!(matches!(dup, Err(PaymentError::DuplicateCart { .. })));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryCartStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(PaymentError::CartNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_compare_and_set() {
        let store = MemoryCartStore::new();
        let cart = cart();
        store.create(&cart).await.unwrap();

        let paid = StatusUpdate::new(PaymentStatus::Paid, PaymentProvider::Paypal);
        let first = store.update_status(&cart.id, &paid).await.unwrap();
        let second = store.update_status(&cart.id, &paid).await.unwrap();

        assert!(first.should_notify());
        assert!(!second.should_notify());
        assert_eq!(
            store.get(&cart.id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_single_winner() {
        let store = MemoryCartStore::new();
        let cart = cart();
        store.create(&cart).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let id = cart.id.clone();
            handles.push(tokio::spawn(async move {
                let status = if i % 2 == 0 {
                    PaymentStatus::Paid
                } else {
                    PaymentStatus::Canceled
                };
                let update = StatusUpdate::new(status, PaymentProvider::Paypal);
                store.update_status(&id, &update).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().should_notify() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
