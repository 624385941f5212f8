//! Bounded retries of a single pipeline step.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::RetryConfig;
use super::error::PipelineError;
use super::types::Step;
use crate::audit::{AuditEvent, AuditHandle};
use crate::catalog::CatalogError;
use crate::metrics;
use crate::preparator::PreparatorError;

/// An error returned by an external collaborator.
pub(crate) trait StepError: std::fmt::Display {
    fn is_retryable(&self) -> bool;

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl StepError for CatalogError {
    fn is_retryable(&self) -> bool {
        CatalogError::is_retryable(self)
    }
}

impl StepError for PreparatorError {
    fn is_retryable(&self) -> bool {
        PreparatorError::is_retryable(self)
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, PreparatorError::Cancelled)
    }
}

/// Why a step did not produce a value.
#[derive(Debug)]
pub(crate) enum StepFailure {
    /// The step failed for good; carries `TransientFailure` when retries ran out.
    Failed(PipelineError),
    /// The item was cancelled before or during the step.
    Cancelled,
}

/// Runs steps of one item with retries and cancellation.
pub(crate) struct StepRunner<'a> {
    pub item_id: &'a str,
    pub retry: &'a RetryConfig,
    pub token: &'a CancellationToken,
    pub audit: Option<&'a AuditHandle>,
}

impl StepRunner<'_> {
    /// Run `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// With `interruptible` the running attempt is abandoned as soon as the
    /// token fires. Otherwise the token is only checked between attempts.
    pub async fn run<T, E, F, Fut>(
        &self,
        step: Step,
        interruptible: bool,
        mut op: F,
    ) -> Result<T, StepFailure>
    where
        E: StepError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if self.token.is_cancelled() {
                return Err(StepFailure::Cancelled);
            }

            debug!(item_id = %self.item_id, %step, attempt, "Running step");
            let result = if interruptible {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return Err(StepFailure::Cancelled),
                    result = op() => result,
                }
            } else {
                op().await
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(StepFailure::Cancelled),
                Err(e) => e,
            };

            let retryable = error.is_retryable();
            let message = error.to_string();
            if let Some(audit) = self.audit {
                audit
                    .emit(AuditEvent::ItemStepFailed {
                        item_id: self.item_id.to_string(),
                        step: step.as_str().to_string(),
                        attempt,
                        retryable,
                        error: message.clone(),
                    })
                    .await;
            }

            if !retryable {
                metrics::STEP_FAILURES.with_label_values(&[step.as_str()]).inc();
                return Err(StepFailure::Failed(PipelineError::FatalFailure { step, message }));
            }
            if attempt >= max_attempts {
                warn!(
                    item_id = %self.item_id,
                    %step,
                    "Giving up after {} attempts: {}",
                    attempt,
                    message
                );
                metrics::STEP_FAILURES.with_label_values(&[step.as_str()]).inc();
                return Err(StepFailure::Failed(PipelineError::TransientFailure {
                    step,
                    message,
                }));
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                item_id = %self.item_id,
                %step,
                "Attempt {}/{} failed, retrying in {:?}: {}",
                attempt,
                max_attempts,
                delay,
                message
            );
            metrics::STEP_RETRIES.with_label_values(&[step.as_str()]).inc();

            tokio::select! {
                _ = self.token.cancelled() => return Err(StepFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
