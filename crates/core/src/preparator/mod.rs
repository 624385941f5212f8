//! Item preparation: fetch, customize and place one product.

mod config;
mod error;
mod fs_preparator;
mod traits;
mod types;

pub use config::PreparatorConfig;
pub use error::PreparatorError;
pub use fs_preparator::FsPreparator;
pub use traits::Preparator;
pub use types::{CustomizedArtifact, FetchedArtifact, ItemContext, PlacementResult};
