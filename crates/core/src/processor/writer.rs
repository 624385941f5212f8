//! Serialized status writes.
//!
//! Every change to an order or item goes through [`StatusWriter`]: it takes
//! the per-entity lock, loads the entity, lets the caller decide the change,
//! validates it against the transition table, runs the status change
//! tracker and saves.

use std::sync::Arc;

use tracing::debug;

use super::error::PipelineError;
use crate::audit::{AuditEvent, AuditHandle};
use crate::order::{Order, OrderItem, OrderStore, StoreError};
use crate::status::{EntityKind, EntityLocks, Status, StatusChangeTracker, Tracked};

/// Status change requested by an update closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Do not save anything.
    Skip,
    /// Save other fields, keep the status.
    Keep,
    /// Move through these hops, each checked against the transition table.
    To(Vec<Status>),
}

impl Transition {
    /// A single hop.
    pub fn to(status: Status) -> Self {
        Transition::To(vec![status])
    }
}

/// Result of an update.
#[derive(Debug, Clone)]
pub enum WriteOutcome<T> {
    /// The entity was saved.
    Written(T),
    /// Nothing was saved; the entity as loaded.
    Unchanged(T),
}

impl<T> WriteOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            WriteOutcome::Written(t) | WriteOutcome::Unchanged(t) => t,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written(_))
    }
}

/// An entity persisted through the order store.
trait Stored: Tracked + Sized + Send {
    const KIND: EntityKind;

    fn load(store: &dyn OrderStore, id: &str) -> Result<Option<Self>, StoreError>;
    fn save(&self, store: &dyn OrderStore) -> Result<(), StoreError>;
    fn status(&self) -> Status;
    fn set_status(&mut self, status: Status);
    fn missing(id: &str) -> PipelineError;
    fn change_event(&self, from: Status) -> AuditEvent;
}

impl Stored for Order {
    const KIND: EntityKind = EntityKind::Order;

    fn load(store: &dyn OrderStore, id: &str) -> Result<Option<Self>, StoreError> {
        store.get_order(id)
    }

    fn save(&self, store: &dyn OrderStore) -> Result<(), StoreError> {
        store.save_order(self)
    }

    fn status(&self) -> Status {
        self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    fn missing(id: &str) -> PipelineError {
        PipelineError::order_not_found(id)
    }

    fn change_event(&self, from: Status) -> AuditEvent {
        AuditEvent::OrderStatusChanged {
            order_id: self.id.clone(),
            from_status: from,
            to_status: self.status,
            info: Some(self.additional_status_info.clone()).filter(|s| !s.is_empty()),
        }
    }
}

impl Stored for OrderItem {
    const KIND: EntityKind = EntityKind::Item;

    fn load(store: &dyn OrderStore, id: &str) -> Result<Option<Self>, StoreError> {
        store.get_item(id)
    }

    fn save(&self, store: &dyn OrderStore) -> Result<(), StoreError> {
        store.save_item(self)
    }

    fn status(&self) -> Status {
        self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    fn missing(id: &str) -> PipelineError {
        PipelineError::item_not_found(id)
    }

    fn change_event(&self, from: Status) -> AuditEvent {
        AuditEvent::ItemStatusChanged {
            item_id: self.id.clone(),
            batch_id: self.batch_id.clone(),
            from_status: from,
            to_status: self.status,
        }
    }
}

/// Applies status changes one writer at a time per entity.
#[derive(Clone)]
pub struct StatusWriter {
    store: Arc<dyn OrderStore>,
    tracker: StatusChangeTracker,
    locks: EntityLocks,
    audit: Option<AuditHandle>,
}

impl StatusWriter {
    pub fn new(store: Arc<dyn OrderStore>, tracker: StatusChangeTracker) -> Self {
        Self {
            store,
            tracker,
            locks: EntityLocks::new(),
            audit: None,
        }
    }

    /// Emit status change events to the audit trail.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn tracker(&self) -> &StatusChangeTracker {
        &self.tracker
    }

    /// Atomically read, modify and save one item.
    ///
    /// The closure must not assign `status`; it requests a change through
    /// the returned [`Transition`]. An error from the closure aborts the
    /// write.
    pub async fn update_item<F>(
        &self,
        item_id: &str,
        f: F,
    ) -> Result<WriteOutcome<OrderItem>, PipelineError>
    where
        F: FnOnce(&mut OrderItem) -> Result<Transition, PipelineError> + Send,
    {
        self.update(item_id, f).await
    }

    /// Atomically read, modify and save one order.
    pub async fn update_order<F>(
        &self,
        order_id: &str,
        f: F,
    ) -> Result<WriteOutcome<Order>, PipelineError>
    where
        F: FnOnce(&mut Order) -> Result<Transition, PipelineError> + Send,
    {
        self.update(order_id, f).await
    }

    async fn update<T, F>(&self, id: &str, f: F) -> Result<WriteOutcome<T>, PipelineError>
    where
        T: Stored,
        F: FnOnce(&mut T) -> Result<Transition, PipelineError> + Send,
    {
        let guard = self.locks.acquire(T::KIND, id).await;

        let mut entity = T::load(self.store.as_ref(), id)?.ok_or_else(|| T::missing(id))?;
        self.tracker.observe(&mut entity);
        let before = entity.status();

        let target = match f(&mut entity)? {
            Transition::Skip => return Ok(WriteOutcome::Unchanged(entity)),
            Transition::Keep => before,
            Transition::To(hops) => before.check_path(&hops)?,
        };
        entity.set_status(target);
        self.tracker.before_save(&mut entity);
        entity.save(self.store.as_ref())?;
        drop(guard);

        if target != before {
            debug!("{:?} {} moved {} -> {}", T::KIND, id, before, target);
            if let Some(ref audit) = self.audit {
                audit.emit(entity.change_event(before)).await;
            }
        }
        Ok(WriteOutcome::Written(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{CreateItemRequest, CreateOrderRequest, NewOrder, SqliteOrderStore};
    use crate::status::SteppingClock;
    use chrono::{Duration, TimeZone, Utc};

    fn setup() -> (StatusWriter, NewOrder) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let tracker =
            StatusChangeTracker::new(Arc::new(SteppingClock::new(start, Duration::seconds(1))));
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let new_order = CreateOrderRequest::product_order("alice")
            .with_batch(vec![CreateItemRequest::new("p-1")])
            .into_new_order(&tracker);
        store.insert(&new_order).unwrap();
        (StatusWriter::new(store, tracker), new_order)
    }

    fn item_id(new_order: &NewOrder) -> String {
        new_order.batches[0].items[0].id.clone()
    }

    #[tokio::test]
    async fn test_transition_stamps_and_saves() {
        let (writer, new_order) = setup();
        let id = item_id(&new_order);
        let created = new_order.batches[0].items[0].status_changed_on;

        let item = writer
            .update_item(&id, |_| Ok(Transition::To(vec![Status::Accepted, Status::InProduction])))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(item.status, Status::InProduction);
        assert!(item.status_changed_on > created);
        let stored = writer.store().get_item(&id).unwrap().unwrap();
        assert_eq!(stored.status, Status::InProduction);
        assert_eq!(stored.status_changed_on, item.status_changed_on);
    }

    #[tokio::test]
    async fn test_keep_does_not_stamp() {
        let (writer, new_order) = setup();
        let id = item_id(&new_order);
        let created = new_order.batches[0].items[0].status_changed_on;

        let outcome = writer
            .update_item(&id, |item| {
                item.remark = "ignored".to_string();
                item.additional_status_info = "waiting".to_string();
                Ok(Transition::Keep)
            })
            .await
            .unwrap();

        assert!(outcome.is_written());
        let stored = writer.store().get_item(&id).unwrap().unwrap();
        assert_eq!(stored.additional_status_info, "waiting");
        assert_eq!(stored.status_changed_on, created);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_rejected() {
        let (writer, new_order) = setup();
        let id = item_id(&new_order);

        let err = writer
            .update_item(&id, |_| Ok(Transition::to(Status::Completed)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition(_)));
        let stored = writer.store().get_item(&id).unwrap().unwrap();
        assert_eq!(stored.status, Status::Submitted);
    }

    #[tokio::test]
    async fn test_direct_status_assignment_is_ignored() {
        let (writer, new_order) = setup();
        let id = item_id(&new_order);

        let item = writer
            .update_item(&id, |item| {
                item.status = Status::Completed;
                Ok(Transition::Keep)
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(item.status, Status::Submitted);
    }

    #[tokio::test]
    async fn test_skip_leaves_store_untouched() {
        let (writer, new_order) = setup();
        let id = item_id(&new_order);

        let outcome = writer
            .update_item(&id, |item| {
                item.additional_status_info = "not saved".to_string();
                Ok(Transition::Skip)
            })
            .await
            .unwrap();
        assert!(!outcome.is_written());
        let stored = writer.store().get_item(&id).unwrap().unwrap();
        assert_eq!(stored.additional_status_info, "");
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_found() {
        let (writer, _) = setup();
        let err = writer
            .update_order("missing", |_| Ok(Transition::Keep))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_status_change_is_audited() {
        let (writer, new_order) = setup();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let writer = writer.with_audit(AuditHandle::new(tx));

        writer
            .update_order(&new_order.order.id, |_| Ok(Transition::to(Status::Accepted)))
            .await
            .unwrap();
        writer
            .update_order(&new_order.order.id, |_| Ok(Transition::Keep))
            .await
            .unwrap();

        let envelope = rx.try_recv().unwrap();
        assert!(matches!(
            envelope.event,
            AuditEvent::OrderStatusChanged {
                from_status: Status::Submitted,
                to_status: Status::Accepted,
                ..
            }
        ));
        // Keep does not produce an event
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let (writer, new_order) = setup();
        let id = item_id(&new_order);
        writer
            .update_item(&id, |_| {
                Ok(Transition::To(vec![Status::Accepted, Status::InProduction]))
            })
            .await
            .unwrap();
        writer
            .update_item(&id, |_| Ok(Transition::to(Status::Completed)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let writer = writer.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                writer
                    .update_item(&id, |item| {
                        item.downloads += 1;
                        Ok(Transition::Keep)
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = writer.store().get_item(&id).unwrap().unwrap();
        assert_eq!(stored.downloads, 10);
    }
}
