//! Types for the preparator module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::order::SelectedOption;

/// Identity of the item being prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemContext {
    pub order_id: String,
    pub item_id: String,
    /// Owner of the order; deliveries are grouped per user.
    pub user: String,
    /// Catalog identifier of the product.
    pub identifier: String,
}

/// Product data fetched into staging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchedArtifact {
    pub item_id: String,
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Artifact after customization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomizedArtifact {
    pub item_id: String,
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Options the customization was asked to apply.
    pub applied_options: Vec<SelectedOption>,
}

impl CustomizedArtifact {
    /// Identity customization: the fetched data unchanged.
    pub fn passthrough(artifact: &FetchedArtifact, options: &[SelectedOption]) -> Self {
        Self {
            item_id: artifact.item_id.clone(),
            path: artifact.path.clone(),
            file_name: artifact.file_name.clone(),
            size_bytes: artifact.size_bytes,
            applied_options: options.to_vec(),
        }
    }
}

/// Where a prepared product ended up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementResult {
    /// Final path of the delivered product.
    pub path: PathBuf,
    pub size_bytes: u64,
    /// SHA-256 of the delivered file, when verification is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl PlacementResult {
    /// Base name of the delivered file.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
    }
}
