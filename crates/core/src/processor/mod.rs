//! Item and batch processing.
//!
//! [`ItemProcessor`] drives one item through resolve, fetch, customize and
//! place, retrying transient failures with exponential backoff.
//! [`BatchCoordinator`] runs all items of a batch concurrently and derives
//! the batch status from theirs. Every status write goes through
//! [`StatusWriter`], which serializes writers per entity and stamps status
//! changes.
//!
//! # Example
//!
//! ```ignore
//! use oseo_core::processor::{BatchCoordinator, ItemProcessor, PipelineConfig, StatusWriter};
//!
//! let writer = StatusWriter::new(store, StatusChangeTracker::default());
//! let processor = ItemProcessor::new(
//!     PipelineConfig::default(),
//!     resolver,
//!     preparator,
//!     writer,
//!     CancellationRegistry::new(),
//! );
//! let outcome = BatchCoordinator::new(processor).process_batch(&batch_id).await?;
//! println!("batch is {}", outcome.status());
//! ```

mod batch;
mod cancellation;
mod config;
mod error;
mod item;
mod retry;
mod types;
mod writer;

pub use batch::BatchCoordinator;
pub use cancellation::{CancellationRegistry, OrderLease};
pub use config::{PipelineConfig, RetryConfig};
pub use error::PipelineError;
pub use item::ItemProcessor;
pub use types::{aggregate_status, BatchOutcome, ProcessingOutcome, Step};
pub use writer::{StatusWriter, Transition, WriteOutcome};
