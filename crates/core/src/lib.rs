pub mod audit;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod order;
pub mod preparator;
pub mod processor;
pub mod status;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, CancelScope, SqliteAuditStore,
};
pub use catalog::{CatalogConfig, CatalogError, CatalogResolver, HttpCatalogResolver, ProductDescriptor};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use orchestrator::{
    BatchReport, ItemReport, OrchestratorConfig, OrchestratorStatus, OrderOrchestrator,
    OrderStatusReport,
};
pub use order::{
    Batch, CreateItemRequest, CreateOrderRequest, Order, OrderFilter, OrderItem, OrderKind,
    OrderStore, SqliteOrderStore, StoreError,
};
pub use preparator::{FsPreparator, Preparator, PreparatorConfig, PreparatorError};
pub use processor::{
    BatchCoordinator, CancellationRegistry, ItemProcessor, PipelineConfig, PipelineError,
    ProcessingOutcome, RetryConfig, StatusWriter,
};
pub use status::{Status, StatusChangeTracker, StatusError};
