//! Trait definitions for the preparator module.

use async_trait::async_trait;

use super::error::PreparatorError;
use super::types::{CustomizedArtifact, FetchedArtifact, ItemContext, PlacementResult};
use crate::catalog::ProductDescriptor;
use crate::order::SelectedOption;

/// Performs the fetch, customize and place steps for one item.
///
/// Steps may be invoked again after a retryable failure, so every step must
/// tolerate being repeated.
#[async_trait]
pub trait Preparator: Send + Sync {
    /// Returns the name of this preparator implementation.
    fn name(&self) -> &str;

    /// Retrieve the product data described by `descriptor`.
    async fn fetch(
        &self,
        ctx: &ItemContext,
        descriptor: &ProductDescriptor,
    ) -> Result<FetchedArtifact, PreparatorError>;

    /// Apply the selected options. With no options this is the identity.
    async fn customize(
        &self,
        ctx: &ItemContext,
        artifact: &FetchedArtifact,
        options: &[SelectedOption],
    ) -> Result<CustomizedArtifact, PreparatorError>;

    /// Move the artifact to its final delivery location.
    async fn place(
        &self,
        ctx: &ItemContext,
        artifact: &CustomizedArtifact,
    ) -> Result<PlacementResult, PreparatorError>;

    /// Ask in-flight work for an item to stop. Best effort.
    async fn cancel(&self, item_id: &str);
}
