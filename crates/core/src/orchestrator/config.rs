//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the order orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Order reference that marks a product order as massive.
    /// Unset or empty disables the classification.
    #[serde(default)]
    pub massive_order_reference: Option<String>,

    /// How long shutdown waits for background submissions (seconds).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            massive_order_reference: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_massive_order_reference(mut self, reference: impl Into<String>) -> Self {
        self.massive_order_reference = Some(reference.into());
        self
    }
}
