//! Order orchestrator.
//!
//! Entry point for creating, submitting, polling and cancelling orders. A
//! submission fans the order's batches out to the [`BatchCoordinator`]
//! concurrently and derives the order status once every batch returned.
//!
//! [`BatchCoordinator`]: crate::processor::BatchCoordinator

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::OrderOrchestrator;
pub use types::{BatchReport, ItemReport, OrchestratorStatus, OrderStatusReport};
