//! Order orchestrator implementation.
//!
//! Drives orders through the pipeline:
//! - Submission: order moves to `InProduction`, batches run concurrently
//! - Fan-in: the order status is derived from the batch outcomes
//! - Cancellation: order, batch or item scope, cooperative for work in flight

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::config::OrchestratorConfig;
use super::types::{BatchReport, ItemReport, ItemTally, OrchestratorStatus, OrderStatusReport};
use crate::audit::{AuditEvent, AuditHandle, CancelScope};
use crate::metrics;
use crate::order::{CreateOrderRequest, Order, OrderFilter, OrderItem, OrderKind, OrderStore};
use crate::preparator::Preparator;
use crate::processor::{
    BatchCoordinator, BatchOutcome, CancellationRegistry, ItemProcessor, PipelineError,
    StatusWriter, Transition,
};
use crate::status::Status;

/// Info recorded on an order cancelled by an operator.
const CANCELLED_INFO: &str = "cancelled by operator";

/// Statuses an item can be cancelled from without having started.
fn is_waiting(status: Status) -> bool {
    matches!(
        status,
        Status::Submitted | Status::Accepted | Status::Suspended
    )
}

/// Fan-in of the batch tasks of one submission.
///
/// The order is only concluded when every batch reported back; a batch
/// that errored or whose task died leaves it `InProduction`.
fn collect_outcomes(
    order_id: &str,
    joined: Vec<Result<Result<BatchOutcome, PipelineError>, JoinError>>,
) -> Result<Vec<BatchOutcome>, PipelineError> {
    let mut outcomes = Vec::new();
    let mut failure = None;
    for result in joined {
        match result {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(e)) => {
                error!(order_id = %order_id, "Batch processing error: {}", e);
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!(order_id = %order_id, "Batch task panicked: {}", e);
                failure.get_or_insert(PipelineError::TaskFailed(e.to_string()));
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(outcomes),
    }
}

/// Marks an order as being submitted by this process.
struct InFlightGuard {
    orders: Arc<Mutex<HashSet<String>>>,
    order_id: String,
}

impl InFlightGuard {
    fn enter(orders: &Arc<Mutex<HashSet<String>>>, order_id: &str) -> Option<Self> {
        let inserted = match orders.lock() {
            Ok(mut set) => set.insert(order_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(order_id.to_string()),
        };
        inserted.then(|| Self {
            orders: Arc::clone(orders),
            order_id: order_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        match self.orders.lock() {
            Ok(mut set) => set.remove(&self.order_id),
            Err(poisoned) => poisoned.into_inner().remove(&self.order_id),
        };
    }
}

/// The order orchestrator: entry point of the core.
pub struct OrderOrchestrator<P: Preparator + 'static> {
    config: OrchestratorConfig,
    coordinator: BatchCoordinator<P>,
    audit: Option<AuditHandle>,

    // Runtime state
    in_flight: Arc<Mutex<HashSet<String>>>,
    accepting: Arc<AtomicBool>,
    background: TaskTracker,
}

impl<P: Preparator + 'static> Clone for OrderOrchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            coordinator: self.coordinator.clone(),
            audit: self.audit.clone(),
            in_flight: Arc::clone(&self.in_flight),
            accepting: Arc::clone(&self.accepting),
            background: self.background.clone(),
        }
    }
}

impl<P: Preparator + 'static> OrderOrchestrator<P> {
    /// Create a new orchestrator on top of an item processor.
    pub fn new(
        config: OrchestratorConfig,
        processor: ItemProcessor<P>,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            config,
            coordinator: BatchCoordinator::new(processor),
            audit,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            accepting: Arc::new(AtomicBool::new(true)),
            background: TaskTracker::new(),
        }
    }

    fn processor(&self) -> &ItemProcessor<P> {
        self.coordinator.processor()
    }

    fn writer(&self) -> &StatusWriter {
        self.processor().writer()
    }

    fn store(&self) -> &Arc<dyn OrderStore> {
        self.writer().store()
    }

    fn cancellations(&self) -> &CancellationRegistry {
        self.processor().cancellations()
    }

    pub fn coordinator(&self) -> &BatchCoordinator<P> {
        &self.coordinator
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    // =========================================================================
    // Creation and queries
    // =========================================================================

    /// Persist a new order with all its batches and items in `Submitted`.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, PipelineError> {
        if request.user.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("user is required".to_string()));
        }
        if request.batches.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "order needs at least one batch".to_string(),
            ));
        }
        if let Some(position) = request.batches.iter().position(Vec::is_empty) {
            return Err(PipelineError::InvalidRequest(format!(
                "batch {} has no items",
                position
            )));
        }
        if request.batches.iter().flatten().any(|i| i.identifier.trim().is_empty()) {
            return Err(PipelineError::InvalidRequest(
                "every item needs a catalog identifier".to_string(),
            ));
        }

        let mut request = request;
        request.kind = OrderKind::classify(
            request.kind,
            &request.reference,
            self.config.massive_order_reference.as_deref(),
        );
        let items = request.item_count();
        let new_order = request.into_new_order(self.writer().tracker());
        self.store().insert(&new_order)?;

        let order = new_order.order;
        info!(
            order_id = %order.id,
            kind = order.kind.name(),
            "Created order with {} batches and {} items",
            new_order.batches.len(),
            items
        );
        self.emit(AuditEvent::OrderCreated {
            order_id: order.id.clone(),
            user: order.user.clone(),
            kind: order.kind.name().to_string(),
            batches: new_order.batches.len(),
            items,
        })
        .await;
        Ok(order)
    }

    /// Read-only snapshot of an order, its batches and items.
    pub fn get_order_status(&self, order_id: &str) -> Result<OrderStatusReport, PipelineError> {
        let store = self.store();
        let order = store
            .get_order(order_id)?
            .ok_or_else(|| PipelineError::order_not_found(order_id))?;

        let batches = store
            .list_batches(order_id)?
            .iter()
            .map(|batch| {
                let items = store.list_items(&batch.id)?;
                Ok(BatchReport::new(batch, &items))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        Ok(OrderStatusReport::new(&order, batches))
    }

    /// Orders matching a filter, newest first.
    pub fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, PipelineError> {
        Ok(self.store().list_orders(filter)?)
    }

    /// Number of orders matching a filter.
    pub fn count_orders(&self, filter: &OrderFilter) -> Result<i64, PipelineError> {
        Ok(self.store().count_orders(filter)?)
    }

    /// Current runtime status.
    pub fn status(&self) -> OrchestratorStatus {
        let orders_in_flight = match self.in_flight.lock() {
            Ok(set) => set.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        OrchestratorStatus {
            accepting: self.accepting.load(Ordering::Relaxed),
            orders_in_flight,
            items_in_flight: self.processor().active_items(),
            max_parallel_items: self.processor().config().max_parallel_items,
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Begin or continue processing an order and wait for it.
    ///
    /// Orders already running in this process and orders in a terminal
    /// status are left alone. An order left `InProduction` by an earlier
    /// run has its unfinished items picked up again.
    pub async fn submit_order(&self, order_id: &str) -> Result<Order, PipelineError> {
        let order = self
            .store()
            .get_order(order_id)?
            .ok_or_else(|| PipelineError::order_not_found(order_id))?;

        let Some(_guard) = InFlightGuard::enter(&self.in_flight, order_id) else {
            info!(order_id = %order_id, "Order is already being processed");
            return Ok(order);
        };
        let lease = self.cancellations().lease(order_id);

        let order = self
            .writer()
            .update_order(order_id, |order| match order.status {
                Status::Submitted | Status::Accepted | Status::Suspended => {
                    let hops = order.status.path_to_production()?;
                    Ok(Transition::To(hops.to_vec()))
                }
                _ => Ok(Transition::Skip),
            })
            .await?
            .into_inner();

        if order.status != Status::InProduction {
            info!(
                order_id = %order_id,
                status = %order.status,
                "Order is not processable, nothing to do"
            );
            return Ok(order);
        }
        if lease.token().is_cancelled() {
            info!(order_id = %order_id, "Order was cancelled before fan-out");
            return Ok(order);
        }

        let batches = self.store().list_batches(order_id)?;
        info!(order_id = %order_id, "Submitting order with {} batches", batches.len());

        let handles: Vec<JoinHandle<Result<BatchOutcome, PipelineError>>> = batches
            .into_iter()
            .map(|batch| {
                let coordinator = self.coordinator.clone();
                tokio::spawn(async move { coordinator.run_batch(&batch).await })
            })
            .collect();

        let outcomes = collect_outcomes(order_id, join_all(handles).await)?;

        let order = self.conclude(order_id, &outcomes).await?;
        drop(lease);
        Ok(order)
    }

    /// Derive and save the order status from its batch outcomes.
    async fn conclude(
        &self,
        order_id: &str,
        outcomes: &[BatchOutcome],
    ) -> Result<Order, PipelineError> {
        let batch_statuses: Vec<Status> = outcomes.iter().map(BatchOutcome::status).collect();
        let mut tally = ItemTally::default();
        for status in outcomes.iter().flat_map(|o| o.statuses.values()) {
            tally.add(*status);
        }
        let now = self.writer().tracker().now();

        let target = match batch_statuses.first() {
            _ if batch_statuses.iter().all(|s| *s == Status::Completed) => Some(Status::Completed),
            _ if batch_statuses.iter().all(|s| *s == Status::Failed) => Some(Status::Failed),
            Some(first @ (Status::Cancelled | Status::Terminated))
                if batch_statuses.iter().all(|s| s == first) =>
            {
                Some(*first)
            }
            _ => None,
        };

        let order = self
            .writer()
            .update_order(order_id, |order| {
                // Cancelled or otherwise settled while the batches ran.
                if order.status != Status::InProduction {
                    return Ok(Transition::Skip);
                }
                match target {
                    Some(Status::Completed) => {
                        order.completed_on = Some(now);
                        order.additional_status_info.clear();
                        Ok(Transition::to(Status::Completed))
                    }
                    Some(Status::Failed) => {
                        order.additional_status_info = "all batches failed".to_string();
                        Ok(Transition::to(Status::Failed))
                    }
                    Some(status) => {
                        order.additional_status_info = tally.describe();
                        Ok(Transition::to(status))
                    }
                    None => {
                        order.additional_status_info = tally.describe();
                        Ok(Transition::Keep)
                    }
                }
            })
            .await?
            .into_inner();

        metrics::ORDERS_FINISHED
            .with_label_values(&[order.status.as_str()])
            .inc();
        info!(
            order_id = %order_id,
            status = %order.status,
            "Order submission finished: {}",
            tally.describe()
        );
        Ok(order)
    }

    /// Spawn `submit_order` and return immediately.
    ///
    /// Returns `None` once shutdown has begun.
    pub fn process_order_in_background(
        &self,
        order_id: &str,
    ) -> Option<JoinHandle<Result<Order, PipelineError>>> {
        if !self.accepting.load(Ordering::SeqCst) {
            warn!(order_id = %order_id, "Shutting down, not accepting order");
            return None;
        }
        let orchestrator = self.clone();
        let order_id = order_id.to_string();
        Some(self.background.spawn(async move {
            let result = orchestrator.submit_order(&order_id).await;
            if let Err(ref e) = result {
                error!(order_id = %order_id, "Background submission failed: {}", e);
            }
            result
        }))
    }

    /// Stop accepting background work and wait for running submissions.
    ///
    /// Returns false if they did not finish within the configured timeout.
    pub async fn shutdown(&self) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.background.close();
        info!("Waiting for {} background submissions", self.background.len());

        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        match tokio::time::timeout(timeout, self.background.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Background submissions still running after {:?}", timeout);
                false
            }
        }
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancel an order.
    ///
    /// Items that did not start stay as they are and will not start; items
    /// in flight stop at their next suspension point; delivered items keep
    /// their status.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Order, PipelineError> {
        let order = self
            .writer()
            .update_order(order_id, |order| {
                order.additional_status_info = CANCELLED_INFO.to_string();
                Ok(Transition::to(Status::Cancelled))
            })
            .await?
            .into_inner();

        let signalled = self.cancellations().cancel_order(order_id);
        info!(order_id = %order_id, in_flight = signalled, "Order cancelled");
        metrics::CANCELLATIONS
            .with_label_values(&[CancelScope::Order.as_str()])
            .inc();
        self.emit(AuditEvent::OrderCancelled {
            order_id: order_id.to_string(),
            scope: CancelScope::Order,
            target_id: None,
        })
        .await;
        Ok(order)
    }

    /// Cancel every item of a batch that has not finished.
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<BatchReport, PipelineError> {
        let batch = self
            .store()
            .get_batch(batch_id)?
            .ok_or_else(|| PipelineError::batch_not_found(batch_id))?;

        let signalled = self.cancellations().cancel_batch(batch_id);
        for item in self.store().list_items(batch_id)? {
            self.cancel_waiting_item(&item, signalled).await?;
        }
        info!(batch_id = %batch_id, in_flight = signalled, "Batch cancelled");
        metrics::CANCELLATIONS
            .with_label_values(&[CancelScope::Batch.as_str()])
            .inc();
        self.emit(AuditEvent::OrderCancelled {
            order_id: batch.order_id.clone(),
            scope: CancelScope::Batch,
            target_id: Some(batch_id.to_string()),
        })
        .await;

        let items = self.store().list_items(batch_id)?;
        Ok(BatchReport::new(&batch, &items))
    }

    /// Cancel a single item.
    pub async fn cancel_item(&self, item_id: &str) -> Result<ItemReport, PipelineError> {
        let item = self
            .store()
            .get_item(item_id)?
            .ok_or_else(|| PipelineError::item_not_found(item_id))?;
        item.status.check_transition(Status::Cancelled)?;
        let batch = self
            .store()
            .get_batch(&item.batch_id)?
            .ok_or_else(|| PipelineError::batch_not_found(&item.batch_id))?;

        let signalled = self.cancellations().cancel_item(item_id);
        let item = self.cancel_waiting_item(&item, signalled).await?;
        info!(item_id = %item_id, in_flight = signalled, "Item cancelled");
        metrics::CANCELLATIONS
            .with_label_values(&[CancelScope::Item.as_str()])
            .inc();
        self.emit(AuditEvent::OrderCancelled {
            order_id: batch.order_id,
            scope: CancelScope::Item,
            target_id: Some(item_id.to_string()),
        })
        .await;
        Ok(ItemReport::from(&item))
    }

    /// Move an item that has not started to `Cancelled`.
    ///
    /// Items in production with a live token are left to their processor,
    /// which observes the cancellation. Without one the item was left behind
    /// by an interrupted run and is cancelled here, so a resume skips it.
    async fn cancel_waiting_item(
        &self,
        item: &OrderItem,
        live: bool,
    ) -> Result<OrderItem, PipelineError> {
        let cancellable = |status: Status| {
            is_waiting(status) || (!live && status == Status::InProduction)
        };
        if !cancellable(item.status) {
            return Ok(item.clone());
        }
        let item = self
            .writer()
            .update_item(&item.id, |item| {
                if !cancellable(item.status) {
                    return Ok(Transition::Skip);
                }
                item.additional_status_info = CANCELLED_INFO.to_string();
                Ok(Transition::to(Status::Cancelled))
            })
            .await?
            .into_inner();
        debug!(item_id = %item.id, status = %item.status, "Waiting item cancelled");
        Ok(item)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Record that a delivered item was downloaded.
    ///
    /// The first acknowledgement moves `Completed` to `Downloaded`; later
    /// ones only count.
    pub async fn acknowledge_download(&self, item_id: &str) -> Result<ItemReport, PipelineError> {
        let mut first = false;
        let item = self
            .writer()
            .update_item(item_id, |item| {
                let transition = match item.status {
                    Status::Downloaded => Transition::Keep,
                    _ => {
                        first = true;
                        Transition::to(Status::Downloaded)
                    }
                };
                item.downloads += 1;
                Ok(transition)
            })
            .await?
            .into_inner();

        debug!(item_id = %item_id, downloads = item.downloads, "Download acknowledged");
        metrics::DOWNLOADS_ACKNOWLEDGED
            .with_label_values(&[if first { "true" } else { "false" }])
            .inc();
        self.emit(AuditEvent::ItemDownloaded {
            item_id: item_id.to_string(),
            downloads: item.downloads,
        })
        .await;
        Ok(ItemReport::from(&item))
    }
}
