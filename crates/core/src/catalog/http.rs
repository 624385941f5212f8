//! HTTP catalog resolver.
//!
//! Looks products up with `GET {base_url}/records/{identifier}`, expecting a
//! JSON [`ProductDescriptor`] in the response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CatalogError, CatalogResolver, ProductDescriptor};

/// HTTP catalog resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://localhost:8081/catalog".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("oseod/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Catalog resolver backed by an HTTP records endpoint.
pub struct HttpCatalogResolver {
    client: Client,
    base_url: String,
}

impl HttpCatalogResolver {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CatalogError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn record_url(&self, identifier: &str) -> String {
        format!("{}/records/{}", self.base_url, identifier)
    }
}

/// Map a non-success HTTP status to a catalog error.
fn classify_status(status: StatusCode, identifier: &str, body: String) -> CatalogError {
    if status == StatusCode::NOT_FOUND {
        CatalogError::NotFound(identifier.to_string())
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CatalogError::Transient(format!("HTTP {}: {}", status.as_u16(), body))
    } else {
        CatalogError::Fatal(format!("HTTP {}: {}", status.as_u16(), body))
    }
}

#[async_trait]
impl CatalogResolver for HttpCatalogResolver {
    fn name(&self) -> &str {
        "http"
    }

    async fn resolve(&self, identifier: &str) -> Result<ProductDescriptor, CatalogError> {
        let url = self.record_url(identifier);
        debug!("Resolving catalog identifier {} via {}", identifier, url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!("Catalog request for {} failed: {}", identifier, e);
            CatalogError::Transient(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, identifier, body));
        }

        let mut descriptor: ProductDescriptor = response.json().await.map_err(|e| {
            CatalogError::Fatal(format!("invalid catalog record for {}: {}", identifier, e))
        })?;
        if descriptor.identifier.is_empty() {
            descriptor.identifier = identifier.to_string();
        }
        Ok(descriptor)
    }
}
