//! Order, batch and order item data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{Status, StatusChangeTracker, Tracked, TrackedFields};

// ============================================================================
// Order classification
// ============================================================================

/// Kind of order, with the attributes specific to each kind.
///
/// The kind is decided once when the order is created and carried as data;
/// processing treats every kind the same way.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    /// Regular order for catalog products.
    #[default]
    ProductOrder,
    /// Product order flagged as massive through its reference.
    MassiveOrder,
    /// Order generated by a subscription.
    SubscriptionOrder { subscription_id: String },
    /// Tasking order.
    TaskingOrder,
}

impl OrderKind {
    /// Classify a requested order kind.
    ///
    /// A product order whose reference equals the configured massive-order
    /// sentinel becomes a massive order. Every other request keeps its kind.
    pub fn classify(requested: OrderKind, reference: &str, massive_reference: Option<&str>) -> Self {
        match (requested, massive_reference) {
            (OrderKind::ProductOrder, Some(sentinel)) if !sentinel.is_empty() && reference == sentinel => {
                OrderKind::MassiveOrder
            }
            (requested, _) => requested,
        }
    }

    /// Short name used in logs and filters.
    pub fn name(&self) -> &'static str {
        match self {
            OrderKind::ProductOrder => "PRODUCT_ORDER",
            OrderKind::MassiveOrder => "MASSIVE_ORDER",
            OrderKind::SubscriptionOrder { .. } => "SUBSCRIPTION_ORDER",
            OrderKind::TaskingOrder => "TASKING_ORDER",
        }
    }
}

/// Order priority.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Standard,
    FastTrack,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Standard => "STANDARD",
            Priority::FastTrack => "FAST_TRACK",
        }
    }
}

/// Packaging requested for the delivered products.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
    Bzip2,
}

impl Packaging {
    pub fn as_str(&self) -> &'static str {
        match self {
            Packaging::Bzip2 => "bzip2",
        }
    }
}

/// A customization option selected by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedOption {
    pub name: String,
    pub value: String,
}

impl SelectedOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Client-visible unit of purchase; root of the order hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier (UUID).
    pub id: String,
    pub kind: OrderKind,
    /// Owner of the order.
    pub user: String,
    pub status: Status,
    /// When `status` last changed.
    pub status_changed_on: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
    pub completed_on: Option<DateTime<Utc>>,
    /// Free-text status annotation visible to the client.
    #[serde(default)]
    pub additional_status_info: String,
    #[serde(default)]
    pub mission_specific_status_info: String,
    /// Client reference for the order.
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaging: Option<Packaging>,
    /// Options applying to every item unless overridden.
    #[serde(default)]
    pub options: Vec<SelectedOption>,

    #[serde(skip)]
    pub(crate) observed_status: Option<Status>,
}

/// Internal grouping of items processed together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    pub id: String,
    pub order_id: String,
    /// Position of the batch within its order.
    pub position: u32,
    pub created_on: DateTime<Utc>,
}

/// Smallest unit of work: one catalog product to fetch, customize and place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Unique identifier (UUID).
    pub id: String,
    pub batch_id: String,
    /// Position of the item within its batch.
    pub position: u32,
    /// Id of the item in the client's request.
    #[serde(default)]
    pub item_id: String,
    /// Catalog identifier of the product.
    pub identifier: String,
    #[serde(default)]
    pub collection_id: String,
    pub status: Status,
    pub status_changed_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub additional_status_info: String,
    #[serde(default)]
    pub remark: String,
    /// Name of the delivered file once placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Number of acknowledged downloads.
    #[serde(default)]
    pub downloads: u32,
    pub created_on: DateTime<Utc>,
    pub completed_on: Option<DateTime<Utc>>,
    /// Item-level options; these win over order options with the same name.
    #[serde(default)]
    pub options: Vec<SelectedOption>,

    #[serde(skip)]
    pub(crate) observed_status: Option<Status>,
}

impl Tracked for Order {
    fn tracked_id(&self) -> &str {
        &self.id
    }

    fn tracked_fields(&mut self) -> TrackedFields<'_> {
        TrackedFields {
            status: self.status,
            status_changed_on: &mut self.status_changed_on,
            observed_status: &mut self.observed_status,
        }
    }
}

impl Tracked for OrderItem {
    fn tracked_id(&self) -> &str {
        &self.id
    }

    fn tracked_fields(&mut self) -> TrackedFields<'_> {
        TrackedFields {
            status: self.status,
            status_changed_on: &mut self.status_changed_on,
            observed_status: &mut self.observed_status,
        }
    }
}

impl OrderItem {
    /// Options to apply when customizing this item.
    ///
    /// Item options override order options with the same name.
    pub fn effective_options(&self, order_options: &[SelectedOption]) -> Vec<SelectedOption> {
        let mut merged: Vec<SelectedOption> = order_options
            .iter()
            .filter(|o| !self.options.iter().any(|i| i.name == o.name))
            .cloned()
            .collect();
        merged.extend(self.options.iter().cloned());
        merged
    }
}

// ============================================================================
// Creation requests
// ============================================================================

/// Request to create one order item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateItemRequest {
    #[serde(default)]
    pub item_id: String,
    pub identifier: String,
    #[serde(default)]
    pub collection_id: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub options: Vec<SelectedOption>,
}

impl CreateItemRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = item_id.into();
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push(SelectedOption::new(name, value));
        self
    }
}

/// Validated order input handed over by the protocol layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user: String,
    #[serde(default)]
    pub kind: OrderKind,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub packaging: Option<Packaging>,
    #[serde(default)]
    pub options: Vec<SelectedOption>,
    /// Items grouped by batch.
    pub batches: Vec<Vec<CreateItemRequest>>,
}

impl CreateOrderRequest {
    /// A product order with no batches yet.
    pub fn product_order(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            kind: OrderKind::ProductOrder,
            reference: String::new(),
            remark: String::new(),
            priority: Priority::Standard,
            packaging: None,
            options: Vec::new(),
            batches: Vec::new(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push(SelectedOption::new(name, value));
        self
    }

    /// Append a batch of items.
    pub fn with_batch(mut self, items: Vec<CreateItemRequest>) -> Self {
        self.batches.push(items);
        self
    }

    /// Total number of items across batches.
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Build the entity hierarchy, every entity starting `Submitted`.
    ///
    /// The tracker stamps `status_changed_on` on every new entity, which is
    /// the first observation of its status.
    pub fn into_new_order(self, tracker: &StatusChangeTracker) -> NewOrder {
        let created_on = tracker.now();
        let order_id = uuid::Uuid::new_v4().to_string();

        let mut order = Order {
            id: order_id.clone(),
            kind: self.kind,
            user: self.user,
            status: Status::Submitted,
            status_changed_on: None,
            created_on,
            completed_on: None,
            additional_status_info: String::new(),
            mission_specific_status_info: String::new(),
            reference: self.reference,
            remark: self.remark,
            priority: self.priority,
            packaging: self.packaging,
            options: self.options,
            observed_status: None,
        };
        tracker.before_save(&mut order);

        let batches = self
            .batches
            .into_iter()
            .enumerate()
            .map(|(batch_pos, items)| {
                let batch = Batch {
                    id: uuid::Uuid::new_v4().to_string(),
                    order_id: order_id.clone(),
                    position: batch_pos as u32,
                    created_on,
                };
                let items = items
                    .into_iter()
                    .enumerate()
                    .map(|(item_pos, request)| {
                        let mut item = OrderItem {
                            id: uuid::Uuid::new_v4().to_string(),
                            batch_id: batch.id.clone(),
                            position: item_pos as u32,
                            item_id: request.item_id,
                            identifier: request.identifier,
                            collection_id: request.collection_id,
                            status: Status::Submitted,
                            status_changed_on: None,
                            additional_status_info: String::new(),
                            remark: request.remark,
                            file_name: None,
                            downloads: 0,
                            created_on,
                            completed_on: None,
                            options: request.options,
                            observed_status: None,
                        };
                        tracker.before_save(&mut item);
                        item
                    })
                    .collect();
                NewBatch { batch, items }
            })
            .collect();

        NewOrder { order, batches }
    }
}

/// A freshly built order hierarchy, ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order: Order,
    pub batches: Vec<NewBatch>,
}

/// A freshly built batch with its items.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub batch: Batch,
    pub items: Vec<OrderItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_massive_order_by_reference() {
        let kind = OrderKind::classify(OrderKind::ProductOrder, "MASSIVE", Some("MASSIVE"));
        assert_eq!(kind, OrderKind::MassiveOrder);
    }

    #[test]
    fn test_classify_keeps_kind_without_sentinel() {
        assert_eq!(
            OrderKind::classify(OrderKind::ProductOrder, "MASSIVE", None),
            OrderKind::ProductOrder
        );
        assert_eq!(
            OrderKind::classify(OrderKind::ProductOrder, "", Some("")),
            OrderKind::ProductOrder
        );
        assert_eq!(
            OrderKind::classify(OrderKind::ProductOrder, "my order", Some("MASSIVE")),
            OrderKind::ProductOrder
        );
    }

    #[test]
    fn test_classify_only_applies_to_product_orders() {
        let requested = OrderKind::SubscriptionOrder {
            subscription_id: "sub-1".to_string(),
        };
        let kind = OrderKind::classify(requested.clone(), "MASSIVE", Some("MASSIVE"));
        assert_eq!(kind, requested);
    }

    #[test]
    fn test_order_kind_serialization() {
        let kind = OrderKind::SubscriptionOrder {
            subscription_id: "sub-7".to_string(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"type":"subscription_order","subscription_id":"sub-7"}"#);
        assert_eq!(kind.name(), "SUBSCRIPTION_ORDER");
    }

    #[test]
    fn test_priority_serialization() {
        assert_eq!(serde_json::to_string(&Priority::FastTrack).unwrap(), "\"FAST_TRACK\"");
        assert_eq!(Priority::default(), Priority::Standard);
    }

    #[test]
    fn test_into_new_order_builds_hierarchy() {
        let tracker = StatusChangeTracker::default();
        let request = CreateOrderRequest::product_order("alice")
            .with_batch(vec![CreateItemRequest::new("p-1"), CreateItemRequest::new("p-2")])
            .with_batch(vec![CreateItemRequest::new("p-3")]);
        assert_eq!(request.item_count(), 3);

        let new_order = request.into_new_order(&tracker);
        assert_eq!(new_order.order.status, Status::Submitted);
        assert!(new_order.order.status_changed_on.is_some());
        assert_eq!(new_order.batches.len(), 2);
        assert_eq!(new_order.batches[0].items.len(), 2);
        assert_eq!(new_order.batches[1].batch.position, 1);

        for new_batch in &new_order.batches {
            assert_eq!(new_batch.batch.order_id, new_order.order.id);
            for item in &new_batch.items {
                assert_eq!(item.batch_id, new_batch.batch.id);
                assert_eq!(item.status, Status::Submitted);
                assert!(item.status_changed_on.is_some());
            }
        }
    }

    #[test]
    fn test_effective_options_item_overrides_order() {
        let tracker = StatusChangeTracker::default();
        let new_order = CreateOrderRequest::product_order("bob")
            .with_option("format", "GeoTIFF")
            .with_option("bands", "all")
            .with_batch(vec![CreateItemRequest::new("p-1").with_option("format", "NetCDF")])
            .into_new_order(&tracker);

        let item = &new_order.batches[0].items[0];
        let options = item.effective_options(&new_order.order.options);
        assert_eq!(
            options,
            vec![
                SelectedOption::new("bands", "all"),
                SelectedOption::new("format", "NetCDF"),
            ]
        );
    }
}
