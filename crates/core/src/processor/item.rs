//! Drives one order item through resolve, fetch, customize and place.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancellation::CancellationRegistry;
use super::config::PipelineConfig;
use super::error::PipelineError;
use super::retry::{StepFailure, StepRunner};
use super::types::{ProcessingOutcome, Step};
use super::writer::{StatusWriter, Transition};
use crate::audit::AuditHandle;
use crate::catalog::CatalogResolver;
use crate::metrics;
use crate::order::{OrderItem, SelectedOption};
use crate::preparator::{ItemContext, PlacementResult, Preparator};
use crate::status::Status;

/// How processing of an item may begin.
enum Start {
    /// The item already reached a terminal status.
    Finished,
    /// Cancellation or a stopped order keeps the item where it is.
    Held,
    /// The item is in production and the steps should run.
    Run,
}

/// Marks an item as being processed by this process.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    item_id: String,
}

impl ActiveGuard {
    fn enter(active: &Arc<Mutex<HashSet<String>>>, item_id: &str) -> Option<Self> {
        let inserted = match active.lock() {
            Ok(mut set) => set.insert(item_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(item_id.to_string()),
        };
        inserted.then(|| Self {
            active: Arc::clone(active),
            item_id: item_id.to_string(),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        match self.active.lock() {
            Ok(mut set) => set.remove(&self.item_id),
            Err(poisoned) => poisoned.into_inner().remove(&self.item_id),
        };
    }
}

fn outcome_label(outcome: &ProcessingOutcome) -> &'static str {
    match outcome {
        ProcessingOutcome::Completed { .. } => "completed",
        ProcessingOutcome::Failed { .. } => "failed",
        ProcessingOutcome::Stopped { .. } => "stopped",
        ProcessingOutcome::NotStarted { .. } => "not_started",
        ProcessingOutcome::AlreadyRunning => "already_running",
    }
}

fn outcome_of(item: &OrderItem) -> ProcessingOutcome {
    ProcessingOutcome::from_terminal(
        item.status,
        item.file_name.clone(),
        &item.additional_status_info,
    )
}

/// Processes single items, bounding how many run at once.
pub struct ItemProcessor<P: Preparator> {
    resolver: Arc<dyn CatalogResolver>,
    preparator: Arc<P>,
    writer: StatusWriter,
    cancellations: CancellationRegistry,
    config: PipelineConfig,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashSet<String>>>,
    audit: Option<AuditHandle>,
}

impl<P: Preparator> Clone for ItemProcessor<P> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            preparator: Arc::clone(&self.preparator),
            writer: self.writer.clone(),
            cancellations: self.cancellations.clone(),
            config: self.config.clone(),
            permits: Arc::clone(&self.permits),
            active: Arc::clone(&self.active),
            audit: self.audit.clone(),
        }
    }
}

impl<P: Preparator + 'static> ItemProcessor<P> {
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn CatalogResolver>,
        preparator: Arc<P>,
        writer: StatusWriter,
        cancellations: CancellationRegistry,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallel_items.max(1)));
        Self {
            resolver,
            preparator,
            writer,
            cancellations,
            config,
            permits,
            active: Arc::new(Mutex::new(HashSet::new())),
            audit: None,
        }
    }

    /// Report step failures to the audit trail.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn writer(&self) -> &StatusWriter {
        &self.writer
    }

    pub fn preparator(&self) -> &Arc<P> {
        &self.preparator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Number of items currently inside the pipeline steps.
    pub fn active_items(&self) -> usize {
        self.config
            .max_parallel_items
            .max(1)
            .saturating_sub(self.permits.available_permits())
    }

    /// Drive one item to a terminal status.
    ///
    /// Safe to call again for the same item: an item that already finished
    /// is reported as-is without touching it.
    pub async fn process_item(&self, item_id: &str) -> Result<ProcessingOutcome, PipelineError> {
        let store = self.writer.store();
        let item = store
            .get_item(item_id)?
            .ok_or_else(|| PipelineError::item_not_found(item_id))?;
        if item.status.is_terminal() {
            debug!(item_id = %item_id, status = %item.status, "Item already finished");
            return Ok(outcome_of(&item));
        }

        let batch = store
            .get_batch(&item.batch_id)?
            .ok_or_else(|| PipelineError::batch_not_found(&item.batch_id))?;
        let lease = self.cancellations.lease(&batch.order_id);
        let batch_token = self.cancellations.batch_token(lease.order_id(), &batch.id);
        self.run_item(&batch.order_id, item_id, &batch_token).await
    }

    /// Process an item under an already registered batch token.
    pub(crate) async fn run_item(
        &self,
        order_id: &str,
        item_id: &str,
        batch_token: &CancellationToken,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let Some(_active) = ActiveGuard::enter(&self.active, item_id) else {
            debug!(item_id = %item_id, "Item is already being processed");
            return Ok(ProcessingOutcome::AlreadyRunning);
        };
        let token = self
            .cancellations
            .item_token(order_id, batch_token, item_id);

        let outcome = self.run_guarded(order_id, item_id, &token).await?;
        metrics::ITEMS_PROCESSED
            .with_label_values(&[outcome_label(&outcome)])
            .inc();
        Ok(outcome)
    }

    async fn run_guarded(
        &self,
        order_id: &str,
        item_id: &str,
        token: &CancellationToken,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let store = self.writer.store();

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };
        if permit.is_none() {
            debug!(item_id = %item_id, "Cancelled while waiting to start");
        }

        let order = store
            .get_order(order_id)?
            .ok_or_else(|| PipelineError::order_not_found(order_id))?;
        let order_stopped = order.status.is_terminal();

        let mut start = Start::Run;
        let item = self
            .writer
            .update_item(item_id, |item| {
                if item.status.is_terminal() {
                    start = Start::Finished;
                    return Ok(Transition::Skip);
                }
                if permit.is_none() || token.is_cancelled() || order_stopped {
                    // Left in production by an interrupted run; nothing of it
                    // runs here, so an item or batch cancellation settles it.
                    if item.status == Status::InProduction && !order_stopped {
                        start = Start::Finished;
                        item.additional_status_info = "cancelled".to_string();
                        return Ok(Transition::to(Status::Cancelled));
                    }
                    start = Start::Held;
                    return Ok(Transition::Skip);
                }
                if item.status == Status::InProduction {
                    return Ok(Transition::Skip);
                }
                let hops = item.status.path_to_production()?;
                Ok(Transition::To(hops.to_vec()))
            })
            .await?
            .into_inner();

        match start {
            Start::Finished => return Ok(outcome_of(&item)),
            Start::Held => {
                debug!(item_id = %item_id, status = %item.status, "Item held back");
                return Ok(ProcessingOutcome::NotStarted {
                    status: item.status,
                });
            }
            Start::Run => {}
        }

        info!(
            item_id = %item_id,
            order_id = %order.id,
            identifier = %item.identifier,
            "Processing item"
        );
        let started = Instant::now();
        let ctx = ItemContext {
            order_id: order.id.clone(),
            item_id: item.id.clone(),
            user: order.user.clone(),
            identifier: item.identifier.clone(),
        };
        let options = item.effective_options(&order.options);
        let result = self.run_steps(&ctx, &options, token).await;

        let outcome = self.finish(item_id, result).await?;
        metrics::ITEM_DURATION
            .with_label_values(&[outcome_label(&outcome)])
            .observe(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    async fn run_steps(
        &self,
        ctx: &ItemContext,
        options: &[SelectedOption],
        token: &CancellationToken,
    ) -> Result<PlacementResult, StepFailure> {
        let runner = StepRunner {
            item_id: &ctx.item_id,
            retry: &self.config.retry,
            token,
            audit: self.audit.as_ref(),
        };
        let resolver = self.resolver.as_ref();
        let preparator = self.preparator.as_ref();

        let identifier = ctx.identifier.as_str();
        let descriptor = runner
            .run(Step::Resolve, true, move || resolver.resolve(identifier))
            .await?;

        let descriptor = &descriptor;
        let fetched = runner
            .run(Step::Fetch, true, move || preparator.fetch(ctx, descriptor))
            .await?;

        let fetched = &fetched;
        let customized = runner
            .run(Step::Customize, true, move || {
                preparator.customize(ctx, fetched, options)
            })
            .await?;

        // Placing commits the delivery; once it runs it is not interrupted.
        let customized = &customized;
        runner
            .run(Step::Place, false, move || preparator.place(ctx, customized))
            .await
    }

    /// Record the end of the steps on the item.
    async fn finish(
        &self,
        item_id: &str,
        result: Result<PlacementResult, StepFailure>,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let now = self.writer.tracker().now();

        let item = match result {
            Ok(placement) => {
                info!(item_id = %item_id, path = %placement.path.display(), "Item placed");
                self.writer
                    .update_item(item_id, |item| {
                        // Placement already happened; record it even if the
                        // item was suspended meanwhile, but never over a
                        // terminal status.
                        if item.status.is_terminal() {
                            return Ok(Transition::Skip);
                        }
                        item.file_name = placement.file_name();
                        item.completed_on = Some(now);
                        item.additional_status_info.clear();
                        Ok(match item.status {
                            Status::InProduction => Transition::to(Status::Completed),
                            _ => Transition::To(vec![Status::InProduction, Status::Completed]),
                        })
                    })
                    .await?
            }
            Err(StepFailure::Failed(e)) => {
                warn!(item_id = %item_id, "Item failed: {}", e);
                let reason = e.to_string();
                self.writer
                    .update_item(item_id, |item| {
                        if item.status != Status::InProduction {
                            return Ok(Transition::Skip);
                        }
                        item.additional_status_info = reason;
                        Ok(Transition::to(Status::Failed))
                    })
                    .await?
            }
            Err(StepFailure::Cancelled) => {
                info!(item_id = %item_id, "Item cancelled in flight");
                self.preparator.cancel(item_id).await;
                self.writer
                    .update_item(item_id, |item| {
                        if item.status.is_terminal() {
                            return Ok(Transition::Skip);
                        }
                        item.additional_status_info = "cancelled".to_string();
                        Ok(Transition::to(Status::Cancelled))
                    })
                    .await?
            }
        };

        Ok(outcome_of(&item.into_inner()))
    }
}
