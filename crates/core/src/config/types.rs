use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::catalog::CatalogConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::preparator::PreparatorConfig;
use crate::processor::{PipelineConfig, RetryConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub preparator: PreparatorConfig,
    #[serde(default)]
    pub orders: OrchestratorConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("oseo.db")
}

/// Audit trail configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Events buffered before emitters wait on the writer.
    #[serde(default = "default_audit_buffer")]
    pub buffer_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_audit_buffer(),
        }
    }
}

fn default_audit_buffer() -> usize {
    1024
}

/// Config as reported by the admin API.
///
/// Drops the catalog user agent and flattens the retry policy.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub max_parallel_items: usize,
    pub retry: RetryConfig,
    pub catalog_url: String,
    pub staging_dir: PathBuf,
    pub delivery_dir: PathBuf,
    pub massive_order_reference_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            max_parallel_items: config.pipeline.max_parallel_items,
            retry: config.pipeline.retry.clone(),
            catalog_url: config.catalog.base_url.clone(),
            staging_dir: config.preparator.staging_dir.clone(),
            delivery_dir: config.preparator.delivery_dir.clone(),
            massive_order_reference_configured: config
                .orders
                .massive_order_reference
                .as_deref()
                .is_some_and(|r| !r.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "oseo.db");
        assert_eq!(config.pipeline.max_parallel_items, 8);
        assert_eq!(config.pipeline.retry.max_attempts, 3);
        assert_eq!(config.audit.buffer_size, 1024);
        assert!(config.orders.massive_order_reference.is_none());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/data/oseo.sqlite"

[pipeline]
max_parallel_items = 4

[pipeline.retry]
max_attempts = 5
initial_delay_ms = 100
max_delay_ms = 2000
backoff_multiplier = 3.0

[catalog]
base_url = "http://catalog.local/api"
timeout_secs = 5

[preparator]
staging_dir = "/var/oseo/staging"
delivery_dir = "/var/oseo/delivery"

[orders]
massive_order_reference = "MASSIVE"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.pipeline.max_parallel_items, 4);
        assert_eq!(config.pipeline.retry.max_attempts, 5);
        assert_eq!(config.pipeline.retry.backoff_multiplier, 3.0);
        assert_eq!(config.catalog.base_url, "http://catalog.local/api");
        assert_eq!(config.catalog.timeout_secs, 5);
        assert_eq!(
            config.preparator.delivery_dir.to_str().unwrap(),
            "/var/oseo/delivery"
        );
        assert_eq!(
            config.orders.massive_order_reference.as_deref(),
            Some("MASSIVE")
        );
    }

    #[test]
    fn test_sanitized_config() {
        let mut config = Config::default();
        config.orders.massive_order_reference = Some(String::new());

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.server.port, 8080);
        assert_eq!(sanitized.max_parallel_items, 8);
        assert!(!sanitized.massive_order_reference_configured);

        config.orders.massive_order_reference = Some("MASSIVE".to_string());
        assert!(SanitizedConfig::from(&config).massive_order_reference_configured);
    }
}
