//! Catalog lookup: resolves catalog identifiers into product descriptors.

mod http;
mod types;

pub use http::{CatalogConfig, HttpCatalogResolver};
pub use types::{CatalogError, CatalogResolver, ProductDescriptor};
