//! Cancellation tokens for orders, batches and items in flight.
//!
//! Tokens form a tree: an order token parents its batch tokens, which parent
//! their item tokens. Cancelling a node cancels everything beneath it.
//!
//! An order stays registered while at least one [`OrderLease`] for it is
//! alive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct OrderTokens {
    leases: usize,
    token: CancellationToken,
    batches: HashMap<String, CancellationToken>,
    items: HashMap<String, CancellationToken>,
}

/// Registry of the cancellation tokens of orders currently being processed.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    orders: Arc<Mutex<HashMap<String, OrderTokens>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OrderTokens>> {
        match self.orders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register interest in an order's tokens until the lease is dropped.
    pub fn lease(&self, order_id: &str) -> OrderLease {
        let token = {
            let mut orders = self.lock();
            let entry = orders.entry(order_id.to_string()).or_default();
            entry.leases += 1;
            entry.token.clone()
        };
        OrderLease {
            registry: self.clone(),
            order_id: order_id.to_string(),
            token,
        }
    }

    fn release(&self, order_id: &str) {
        let mut orders = self.lock();
        if let Some(entry) = orders.get_mut(order_id) {
            entry.leases = entry.leases.saturating_sub(1);
            if entry.leases == 0 {
                orders.remove(order_id);
            }
        }
    }

    /// Token for an order, registering it if needed.
    pub fn order_token(&self, order_id: &str) -> CancellationToken {
        self.lock()
            .entry(order_id.to_string())
            .or_default()
            .token
            .clone()
    }

    /// Token for a batch, child of its order's token.
    pub fn batch_token(&self, order_id: &str, batch_id: &str) -> CancellationToken {
        let mut orders = self.lock();
        let entry = orders.entry(order_id.to_string()).or_default();
        let parent = entry.token.clone();
        entry
            .batches
            .entry(batch_id.to_string())
            .or_insert_with(|| parent.child_token())
            .clone()
    }

    /// Token for an item, child of the given batch token.
    pub fn item_token(
        &self,
        order_id: &str,
        batch_token: &CancellationToken,
        item_id: &str,
    ) -> CancellationToken {
        let mut orders = self.lock();
        let entry = orders.entry(order_id.to_string()).or_default();
        entry
            .items
            .entry(item_id.to_string())
            .or_insert_with(|| batch_token.child_token())
            .clone()
    }

    /// Cancel a registered order. Returns false if it is not in flight.
    pub fn cancel_order(&self, order_id: &str) -> bool {
        match self.lock().get(order_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel a registered batch. Returns false if it is not in flight.
    pub fn cancel_batch(&self, batch_id: &str) -> bool {
        let orders = self.lock();
        match orders.values().find_map(|entry| entry.batches.get(batch_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel a registered item. Returns false if it is not in flight.
    pub fn cancel_item(&self, item_id: &str) -> bool {
        let orders = self.lock();
        match orders.values().find_map(|entry| entry.items.get(item_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Item IDs registered under a batch of an order that is in flight.
    pub fn items_of_order(&self, order_id: &str) -> Vec<String> {
        self.lock()
            .get(order_id)
            .map(|entry| entry.items.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of orders with registered tokens.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

/// Keeps an order registered; releases it on drop.
pub struct OrderLease {
    registry: CancellationRegistry,
    order_id: String,
    token: CancellationToken,
}

impl OrderLease {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for OrderLease {
    fn drop(&mut self) {
        self.registry.release(&self.order_id);
    }
}
