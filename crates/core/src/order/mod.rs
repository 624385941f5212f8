//! Order hierarchy: orders own batches, batches own items.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteOrderStore;
pub use store::{OrderFilter, OrderStore, StoreError};
pub use types::{
    Batch, CreateItemRequest, CreateOrderRequest, NewBatch, NewOrder, Order, OrderItem, OrderKind,
    Packaging, Priority, SelectedOption,
};
