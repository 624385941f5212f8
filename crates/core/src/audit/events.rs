use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::Status;

/// Scope of an administrative cancellation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelScope {
    Order,
    Batch,
    Item,
}

impl CancelScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelScope::Order => "order",
            CancelScope::Batch => "batch",
            CancelScope::Item => "item",
        }
    }
}

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Order lifecycle
    OrderCreated {
        order_id: String,
        user: String,
        kind: String,
        batches: usize,
        items: usize,
    },
    OrderStatusChanged {
        order_id: String,
        from_status: Status,
        to_status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<String>,
    },
    OrderCancelled {
        order_id: String,
        scope: CancelScope,
        /// Batch or item the cancellation targeted, when narrower than the order.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
    },

    // Item lifecycle
    ItemStatusChanged {
        item_id: String,
        batch_id: String,
        from_status: Status,
        to_status: Status,
    },
    ItemStepFailed {
        item_id: String,
        step: String,
        attempt: u32,
        retryable: bool,
        error: String,
    },
    ItemDownloaded {
        item_id: String,
        downloads: u32,
    },
}

impl AuditEvent {
    /// Every value [`AuditEvent::event_type`] can return.
    pub const EVENT_TYPES: &'static [&'static str] = &[
        "service_started",
        "service_stopped",
        "order_created",
        "order_status_changed",
        "order_cancelled",
        "item_status_changed",
        "item_step_failed",
        "item_downloaded",
    ];

    /// Whether `name` is the type of some audit event.
    pub fn is_event_type(name: &str) -> bool {
        Self::EVENT_TYPES.contains(&name)
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::OrderCreated { .. } => "order_created",
            Self::OrderStatusChanged { .. } => "order_status_changed",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::ItemStatusChanged { .. } => "item_status_changed",
            Self::ItemStepFailed { .. } => "item_step_failed",
            Self::ItemDownloaded { .. } => "item_downloaded",
        }
    }

    /// Get the order ID if this event relates to an order
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::OrderCreated { order_id, .. }
            | Self::OrderStatusChanged { order_id, .. }
            | Self::OrderCancelled { order_id, .. } => Some(order_id),
            _ => None,
        }
    }

    /// Get the item ID if this event relates to an item
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::ItemStatusChanged { item_id, .. }
            | Self::ItemStepFailed { item_id, .. }
            | Self::ItemDownloaded { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    /// Get the user if this event was triggered by a known user
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::OrderCreated { user, .. } => Some(user),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub order_id: Option<String>,
    pub item_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types_are_known() {
        let event = AuditEvent::ItemDownloaded {
            item_id: "i-1".to_string(),
            downloads: 1,
        };
        assert!(AuditEvent::is_event_type(event.event_type()));
        assert!(AuditEvent::is_event_type("order_cancelled"));
        assert!(!AuditEvent::is_event_type("batch_created"));
    }

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.order_id(), None);
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_order_created_ids() {
        let event = AuditEvent::OrderCreated {
            order_id: "o-1".to_string(),
            user: "alice".to_string(),
            kind: "PRODUCT_ORDER".to_string(),
            batches: 2,
            items: 5,
        };
        assert_eq!(event.event_type(), "order_created");
        assert_eq!(event.order_id(), Some("o-1"));
        assert_eq!(event.item_id(), None);
        assert_eq!(event.user_id(), Some("alice"));
    }

    #[test]
    fn test_item_events_carry_item_id() {
        let event = AuditEvent::ItemStepFailed {
            item_id: "i-1".to_string(),
            step: "fetch".to_string(),
            attempt: 2,
            retryable: true,
            error: "connection reset".to_string(),
        };
        assert_eq!(event.event_type(), "item_step_failed");
        assert_eq!(event.item_id(), Some("i-1"));
        assert_eq!(event.order_id(), None);
    }

    #[test]
    fn test_serialize_status_changed() {
        let event = AuditEvent::ItemStatusChanged {
            item_id: "i-1".to_string(),
            batch_id: "b-1".to_string(),
            from_status: Status::InProduction,
            to_status: Status::Completed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "item_status_changed");
        assert_eq!(json["from_status"], "InProduction");
        assert_eq!(json["to_status"], "Completed");

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, AuditEvent::ItemStatusChanged { .. }));
    }

    #[test]
    fn test_serialize_cancelled_omits_missing_target() {
        let event = AuditEvent::OrderCancelled {
            order_id: "o-1".to_string(),
            scope: CancelScope::Order,
            target_id: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"scope\":\"order\""));
        assert!(!json.contains("target_id"));
    }
}
