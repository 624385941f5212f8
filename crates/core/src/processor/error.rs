//! Error type for pipeline operations.

use thiserror::Error;

use super::types::Step;
use crate::order::StoreError;
use crate::status::StatusError;

/// Errors surfaced by the processor, coordinator and orchestrator.
///
/// Step failures inside an item never escape as errors; they end up in the
/// item's status. These variants reach the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Referenced order, batch or item does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The requested status change is not allowed.
    #[error(transparent)]
    InvalidTransition(#[from] StatusError),

    /// An external step failed and may succeed later.
    #[error("{step} failed (retryable): {message}")]
    TransientFailure { step: Step, message: String },

    /// An external step failed permanently.
    #[error("{step} failed: {message}")]
    FatalFailure { step: Step, message: String },

    /// The request cannot be turned into an order.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The persistence layer failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// A spawned processing task panicked or was aborted.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
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

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => PipelineError::NotFound { entity, id },
            other => PipelineError::Store(other),
        }
    }
}
