use std::sync::Arc;

use oseo_core::{
    AuditHandle, AuditStore, CancellationRegistry, CatalogResolver, Config, FsPreparator,
    ItemProcessor, OrderOrchestrator, OrderStore, SanitizedConfig, StatusChangeTracker,
    StatusWriter,
};

/// Orchestrator flavor served by the daemon.
pub type Orchestrator = OrderOrchestrator<FsPreparator>;

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Orchestrator,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Orchestrator,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            audit,
            audit_store,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }
}

/// Wire the pipeline over the filesystem preparator.
///
/// Every layer reports to the same audit handle.
pub fn build_orchestrator(
    config: &Config,
    store: Arc<dyn OrderStore>,
    resolver: Arc<dyn CatalogResolver>,
    audit: AuditHandle,
) -> Orchestrator {
    let writer =
        StatusWriter::new(store, StatusChangeTracker::default()).with_audit(audit.clone());
    let preparator = Arc::new(FsPreparator::new(config.preparator.clone()));
    let processor = ItemProcessor::new(
        config.pipeline.clone(),
        resolver,
        preparator,
        writer,
        CancellationRegistry::new(),
    )
    .with_audit(audit.clone());
    OrderOrchestrator::new(config.orders.clone(), processor, Some(audit))
}
