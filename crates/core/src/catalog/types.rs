//! Types for the catalog module.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retrievable description of a catalog product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductDescriptor {
    /// Catalog identifier the descriptor was resolved from.
    pub identifier: String,
    /// Collection the product belongs to, when the catalog reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Where the product data can be fetched from (path or URL).
    pub location: String,
    /// Suggested file name for the delivered product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Any additional catalog attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl ProductDescriptor {
    pub fn new(identifier: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            collection: None,
            location: location.into(),
            file_name: None,
            size_bytes: None,
            attributes: HashMap::new(),
        }
    }

    /// Name to deliver the product under.
    ///
    /// Falls back to the last component of `location`, then the identifier.
    pub fn delivery_name(&self) -> String {
        if let Some(ref name) = self.file_name {
            return name.clone();
        }
        PathBuf::from(self.location.trim_end_matches('/'))
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .map(String::from)
            .unwrap_or_else(|| self.identifier.clone())
    }
}

/// Errors that can occur while resolving a catalog identifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The identifier is not in the catalog.
    #[error("catalog entry not found: {0}")]
    NotFound(String),

    /// Temporary failure (network, rate limit, server error).
    #[error("catalog temporarily unavailable: {0}")]
    Transient(String),

    /// Failure that retrying will not fix.
    #[error("catalog error: {0}")]
    Fatal(String),
}

impl CatalogError {
    /// Whether resolving again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

/// Resolves catalog identifiers into retrievable product descriptors.
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    /// Name of this resolver implementation.
    fn name(&self) -> &str;

    /// Resolve one catalog identifier.
    async fn resolve(&self, identifier: &str) -> Result<ProductDescriptor, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_name_prefers_explicit_file_name() {
        let mut descriptor = ProductDescriptor::new("S2A_001", "/data/in/S2A_001.zip");
        assert_eq!(descriptor.delivery_name(), "S2A_001.zip");

        descriptor.file_name = Some("renamed.zip".to_string());
        assert_eq!(descriptor.delivery_name(), "renamed.zip");
    }

    #[test]
    fn test_delivery_name_falls_back_to_identifier() {
        let descriptor = ProductDescriptor::new("S2A_002", "");
        assert_eq!(descriptor.delivery_name(), "S2A_002");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(CatalogError::Transient("503".into()).is_retryable());
        assert!(!CatalogError::NotFound("x".into()).is_retryable());
        assert!(!CatalogError::Fatal("bad json".into()).is_retryable());
    }

    #[test]
    fn test_descriptor_deserializes_with_defaults() {
        let json = r#"{"identifier": "p-1", "location": "/data/p-1.tif"}"#;
        let descriptor: ProductDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.identifier, "p-1");
        assert!(descriptor.attributes.is_empty());
        assert_eq!(descriptor.collection, None);
    }
}
