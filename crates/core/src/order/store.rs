//! Order storage trait and types.

use thiserror::Error;

use super::{Batch, NewOrder, Order, OrderItem};
use crate::status::Status;

/// Error type for order storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn order_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "order",
            id: id.into(),
        }
    }

    pub fn batch_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "batch",
            id: id.into(),
        }
    }

    pub fn item_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "item",
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Filter for querying orders.
#[derive(Debug, Clone)]
pub struct OrderFilter {
    /// Filter by status.
    pub status: Option<Status>,
    /// Filter by owner.
    pub user: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            user: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Persistence for the order hierarchy.
///
/// Saves overwrite the mutable fields of an existing entity. Callers are
/// responsible for serializing writers of the same entity.
pub trait OrderStore: Send + Sync {
    /// Insert a new order with its batches and items.
    fn insert(&self, new_order: &NewOrder) -> Result<(), StoreError>;

    /// Get an order by ID.
    fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError>;

    /// List orders matching the filter, newest first.
    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Count orders matching the filter.
    fn count_orders(&self, filter: &OrderFilter) -> Result<i64, StoreError>;

    /// Persist the mutable fields of an order.
    fn save_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Get a batch by ID.
    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError>;

    /// List the batches of an order in position order.
    fn list_batches(&self, order_id: &str) -> Result<Vec<Batch>, StoreError>;

    /// Get an item by ID.
    fn get_item(&self, id: &str) -> Result<Option<OrderItem>, StoreError>;

    /// List the items of a batch in position order.
    fn list_items(&self, batch_id: &str) -> Result<Vec<OrderItem>, StoreError>;

    /// Persist the mutable fields of an item.
    fn save_item(&self, item: &OrderItem) -> Result<(), StoreError>;
}
