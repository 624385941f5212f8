//! Fan-out of a batch's items and fan-in of their results.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::error::PipelineError;
use super::item::ItemProcessor;
use super::types::BatchOutcome;
use crate::metrics;
use crate::order::Batch;
use crate::preparator::Preparator;

/// Processes every item of a batch concurrently.
pub struct BatchCoordinator<P: Preparator> {
    processor: ItemProcessor<P>,
}

impl<P: Preparator> Clone for BatchCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
        }
    }
}

impl<P: Preparator + 'static> BatchCoordinator<P> {
    pub fn new(processor: ItemProcessor<P>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &ItemProcessor<P> {
        &self.processor
    }

    /// Process all items of a batch and wait for every one of them.
    pub async fn process_batch(&self, batch_id: &str) -> Result<BatchOutcome, PipelineError> {
        let batch = self
            .processor
            .writer()
            .store()
            .get_batch(batch_id)?
            .ok_or_else(|| PipelineError::batch_not_found(batch_id))?;
        let _lease = self.processor.cancellations().lease(&batch.order_id);
        self.run_batch(&batch).await
    }

    /// Fan out under the batch's token; the order must be leased by the caller.
    pub(crate) async fn run_batch(&self, batch: &Batch) -> Result<BatchOutcome, PipelineError> {
        let store = self.processor.writer().store();
        let token = self
            .processor
            .cancellations()
            .batch_token(&batch.order_id, &batch.id);

        let pending: Vec<_> = store
            .list_items(&batch.id)?
            .into_iter()
            .filter(|item| !item.status.is_terminal())
            .map(|item| item.id)
            .collect();
        info!(
            batch_id = %batch.id,
            order_id = %batch.order_id,
            "Processing batch with {} pending items",
            pending.len()
        );

        let handles = pending.into_iter().map(|item_id| {
            let processor = self.processor.clone();
            let order_id = batch.order_id.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let result = processor.run_item(&order_id, &item_id, &token).await;
                (item_id, result)
            })
        });

        // Each item settles on its own; failures are read back from the store.
        for joined in join_all(handles).await {
            match joined {
                Ok((item_id, Ok(outcome))) => {
                    debug!(item_id = %item_id, ?outcome, "Item returned");
                }
                Ok((item_id, Err(e))) => {
                    warn!(item_id = %item_id, "Item processing error: {}", e);
                }
                Err(e) => {
                    warn!(batch_id = %batch.id, "Item task panicked: {}", e);
                }
            }
        }

        let statuses: HashMap<_, _> = store
            .list_items(&batch.id)?
            .into_iter()
            .map(|item| (item.id, item.status))
            .collect();
        let outcome = BatchOutcome {
            batch_id: batch.id.clone(),
            statuses,
        };

        let status = outcome.status();
        metrics::BATCHES_PROCESSED
            .with_label_values(&[status.as_str()])
            .inc();
        info!(batch_id = %batch.id, %status, "Batch finished");
        Ok(outcome)
    }
}
