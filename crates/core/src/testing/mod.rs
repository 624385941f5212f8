//! Testing utilities and mock implementations for end-to-end tests.
//!
//! This module provides mocks of the catalog and preparator seams plus a
//! [`TestHarness`] wiring a full orchestrator over an in-memory store, so
//! pipeline behavior can be tested without any real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use oseo_core::testing::{fixtures, TestHarness};
//!
//! let h = TestHarness::new();
//! let order = h.orchestrator.create_order(fixtures::product_order("alice", 2, 3)).await?;
//! h.preparator.script("p-1-2", Step::Fetch, StepScript::Fatal);
//! h.orchestrator.submit_order(&order.id).await?;
//! ```

mod mock_catalog;
mod mock_preparator;

pub use mock_catalog::MockCatalogResolver;
pub use mock_preparator::{MockPreparator, RecordedCall, StepGate, StepScript};

use std::sync::Arc;
use std::time::Duration;

use crate::audit::{create_audit_system, AuditFilter, AuditRecord, AuditStore, SqliteAuditStore};
use crate::orchestrator::{OrchestratorConfig, OrderOrchestrator};
use crate::order::{OrderItem, OrderStore, SqliteOrderStore};
use crate::processor::{CancellationRegistry, ItemProcessor, PipelineConfig, RetryConfig, StatusWriter};
use crate::status::{StatusChangeTracker, SteppingClock};

/// A fully wired orchestrator over mocks and an in-memory store.
///
/// Timestamps come from a clock that advances one millisecond per read.
pub struct TestHarness {
    pub orchestrator: OrderOrchestrator<MockPreparator>,
    pub store: Arc<SqliteOrderStore>,
    pub resolver: MockCatalogResolver,
    pub preparator: MockPreparator,
    pub cancellations: CancellationRegistry,
    pub audit_store: Option<Arc<SqliteAuditStore>>,
}

impl TestHarness {
    /// Harness with immediate retries (three attempts) and default limits.
    pub fn new() -> Self {
        Self::with_config(
            PipelineConfig::default().with_retry(RetryConfig::immediate(3)),
            OrchestratorConfig::default(),
        )
    }

    pub fn with_config(pipeline: PipelineConfig, orchestrator: OrchestratorConfig) -> Self {
        Self::build(pipeline, orchestrator, false)
    }

    /// Like [`TestHarness::new`], with audit events recorded in memory.
    ///
    /// Spawns the audit writer, so it must run inside a tokio runtime.
    pub fn with_audit() -> Self {
        Self::build(
            PipelineConfig::default().with_retry(RetryConfig::immediate(3)),
            OrchestratorConfig::default(),
            true,
        )
    }

    fn build(pipeline: PipelineConfig, orchestrator: OrchestratorConfig, audited: bool) -> Self {
        let store = Arc::new(SqliteOrderStore::in_memory().expect("in-memory order store"));
        let resolver = MockCatalogResolver::new();
        let preparator = MockPreparator::new();
        let cancellations = CancellationRegistry::new();

        let (audit, audit_store) = if audited {
            let audit_store =
                Arc::new(SqliteAuditStore::in_memory().expect("in-memory audit store"));
            let (handle, writer) = create_audit_system(audit_store.clone(), 256);
            tokio::spawn(writer.run());
            (Some(handle), Some(audit_store))
        } else {
            (None, None)
        };

        // Every stamp is distinct, so status_changed_on comparisons are exact.
        let tracker = StatusChangeTracker::new(Arc::new(SteppingClock::new(
            chrono::Utc::now(),
            chrono::Duration::milliseconds(1),
        )));
        let mut writer = StatusWriter::new(store.clone(), tracker);
        if let Some(ref handle) = audit {
            writer = writer.with_audit(handle.clone());
        }
        let mut processor = ItemProcessor::new(
            pipeline,
            Arc::new(resolver.clone()),
            Arc::new(preparator.clone()),
            writer,
            cancellations.clone(),
        );
        if let Some(ref handle) = audit {
            processor = processor.with_audit(handle.clone());
        }

        Self {
            orchestrator: OrderOrchestrator::new(orchestrator, processor, audit),
            store,
            resolver,
            preparator,
            cancellations,
            audit_store,
        }
    }

    /// All items of an order, in batch then item order.
    pub fn items(&self, order_id: &str) -> Vec<OrderItem> {
        self.store
            .list_batches(order_id)
            .expect("list batches")
            .iter()
            .flat_map(|batch| self.store.list_items(&batch.id).expect("list items"))
            .collect()
    }

    /// The item of an order with the given catalog identifier.
    pub fn item_by_identifier(&self, order_id: &str, identifier: &str) -> OrderItem {
        self.items(order_id)
            .into_iter()
            .find(|item| item.identifier == identifier)
            .unwrap_or_else(|| panic!("no item with identifier {}", identifier))
    }

    /// Wait until at least `count` audit records match `filter`.
    ///
    /// Audit events are written asynchronously; this polls for up to a second.
    pub async fn audit_records(&self, filter: &AuditFilter, count: usize) -> Vec<AuditRecord> {
        let store = self
            .audit_store
            .as_ref()
            .expect("harness built without audit");
        for _ in 0..200 {
            let records = store.query(filter).expect("query audit");
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.query(filter).expect("query audit")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::order::{CreateItemRequest, CreateOrderRequest};

    /// A product order of `batches` batches with `items_per_batch` items each.
    ///
    /// Item identifiers are `p-{batch}-{item}`, both 1-based.
    pub fn product_order(user: &str, batches: usize, items_per_batch: usize) -> CreateOrderRequest {
        (1..=batches).fold(CreateOrderRequest::product_order(user), |request, b| {
            request.with_batch(
                (1..=items_per_batch)
                    .map(|i| CreateItemRequest::new(format!("p-{}-{}", b, i)))
                    .collect(),
            )
        })
    }

    /// A single-batch product order with the given identifiers.
    pub fn single_batch(user: &str, identifiers: &[&str]) -> CreateOrderRequest {
        CreateOrderRequest::product_order(user).with_batch(
            identifiers
                .iter()
                .map(|identifier| CreateItemRequest::new(*identifier))
                .collect(),
        )
    }
}
