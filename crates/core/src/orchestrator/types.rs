//! Types for the order orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{Batch, Order, OrderItem, OrderKind, Priority};
use crate::processor::aggregate_status;
use crate::status::Status;

/// Snapshot of one item for status polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemReport {
    pub id: String,
    pub item_id: String,
    pub identifier: String,
    pub status: Status,
    pub status_changed_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub additional_status_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub downloads: u32,
    pub completed_on: Option<DateTime<Utc>>,
}

impl From<&OrderItem> for ItemReport {
    fn from(item: &OrderItem) -> Self {
        Self {
            id: item.id.clone(),
            item_id: item.item_id.clone(),
            identifier: item.identifier.clone(),
            status: item.status,
            status_changed_on: item.status_changed_on,
            additional_status_info: item.additional_status_info.clone(),
            file_name: item.file_name.clone(),
            downloads: item.downloads,
            completed_on: item.completed_on,
        }
    }
}

/// Snapshot of one batch; its status is derived from the items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub id: String,
    pub position: u32,
    pub status: Status,
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    pub fn new(batch: &Batch, items: &[OrderItem]) -> Self {
        Self {
            id: batch.id.clone(),
            position: batch.position,
            status: aggregate_status(items.iter().map(|i| i.status)),
            items: items.iter().map(ItemReport::from).collect(),
        }
    }
}

/// Read-only view of an order and everything it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderStatusReport {
    pub id: String,
    pub kind: OrderKind,
    pub user: String,
    pub status: Status,
    pub status_changed_on: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
    pub completed_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub additional_status_info: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    pub priority: Priority,
    pub batches: Vec<BatchReport>,
}

impl OrderStatusReport {
    pub fn new(order: &Order, batches: Vec<BatchReport>) -> Self {
        Self {
            id: order.id.clone(),
            kind: order.kind.clone(),
            user: order.user.clone(),
            status: order.status,
            status_changed_on: order.status_changed_on,
            created_on: order.created_on,
            completed_on: order.completed_on,
            additional_status_info: order.additional_status_info.clone(),
            reference: order.reference.clone(),
            priority: order.priority,
            batches,
        }
    }

    /// Items across all batches.
    pub fn items(&self) -> impl Iterator<Item = &ItemReport> {
        self.batches.iter().flat_map(|b| b.items.iter())
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether new background submissions are accepted.
    pub accepting: bool,
    /// Orders whose submission is running in this process.
    pub orders_in_flight: usize,
    /// Items currently inside the pipeline steps.
    pub items_in_flight: usize,
    /// Configured item concurrency.
    pub max_parallel_items: usize,
}

/// Counts used for the partial completion note of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ItemTally {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}

impl ItemTally {
    pub fn add(&mut self, status: Status) {
        self.total += 1;
        match status {
            s if s.is_success() => self.completed += 1,
            Status::Failed => self.failed += 1,
            Status::Cancelled | Status::Terminated => self.stopped += 1,
            _ => {}
        }
    }

    pub fn pending(&self) -> usize {
        self.total - self.completed - self.failed - self.stopped
    }

    /// Free-text note for `additional_status_info`.
    pub fn describe(&self) -> String {
        let mut note = format!(
            "{} of {} items completed, {} failed",
            self.completed, self.total, self.failed
        );
        if self.stopped > 0 {
            note.push_str(&format!(", {} cancelled", self.stopped));
        }
        if self.pending() > 0 {
            note.push_str(&format!(", {} pending", self.pending()));
        }
        note
    }
}
