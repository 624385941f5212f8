//! Mock catalog resolver for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::catalog::{CatalogError, CatalogResolver, ProductDescriptor};

#[derive(Debug, Default)]
struct State {
    descriptors: HashMap<String, ProductDescriptor>,
    errors: HashMap<String, CatalogError>,
    transient: HashMap<String, u32>,
    delay: Option<Duration>,
    calls: Vec<String>,
}

/// Mock implementation of the CatalogResolver trait.
///
/// Every identifier resolves to a 1 KiB product named `{identifier}.dat`
/// unless configured otherwise. Clones share state.
///
/// # Example
///
/// ```rust,ignore
/// use oseo_core::testing::MockCatalogResolver;
///
/// let resolver = MockCatalogResolver::new();
/// resolver.set_missing("S2A_404");
/// resolver.fail_transient_times("S2A_503", 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockCatalogResolver {
    state: Arc<RwLock<State>>,
}

impl MockCatalogResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Descriptor returned when nothing was configured for `identifier`.
    pub fn default_descriptor(identifier: &str) -> ProductDescriptor {
        let mut descriptor =
            ProductDescriptor::new(identifier, format!("mock://catalog/{}", identifier));
        descriptor.file_name = Some(format!("{}.dat", identifier));
        descriptor.size_bytes = Some(1024);
        descriptor
    }

    /// Return `descriptor` for its identifier.
    pub fn set_descriptor(&self, descriptor: ProductDescriptor) {
        self.write(|s| {
            s.descriptors
                .insert(descriptor.identifier.clone(), descriptor);
        });
    }

    /// Report `identifier` as not in the catalog.
    pub fn set_missing(&self, identifier: &str) {
        self.set_error(identifier, CatalogError::NotFound(identifier.to_string()));
    }

    /// Always fail resolving `identifier` with `error`.
    pub fn set_error(&self, identifier: &str, error: CatalogError) {
        self.write(|s| {
            s.errors.insert(identifier.to_string(), error);
        });
    }

    /// Fail the next `times` resolutions of `identifier` transiently.
    pub fn fail_transient_times(&self, identifier: &str, times: u32) {
        self.write(|s| {
            s.transient.insert(identifier.to_string(), times);
        });
    }

    /// Make every resolution take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.write(|s| s.delay = Some(delay));
    }

    /// All identifiers resolved so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.read(|s| s.calls.clone())
    }

    /// How many times `identifier` was resolved.
    pub fn resolve_count(&self, identifier: &str) -> usize {
        self.read(|s| s.calls.iter().filter(|c| *c == identifier).count())
    }
}

#[async_trait]
impl CatalogResolver for MockCatalogResolver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, identifier: &str) -> Result<ProductDescriptor, CatalogError> {
        let delay = self.write(|s| {
            s.calls.push(identifier.to_string());
            s.delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.write(|s| {
            if let Some(remaining) = s.transient.get_mut(identifier) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CatalogError::Transient(format!(
                        "mock catalog busy for {}",
                        identifier
                    )));
                }
            }
            if let Some(error) = s.errors.get(identifier) {
                return Err(error.clone());
            }
            Ok(s
                .descriptors
                .get(identifier)
                .cloned()
                .unwrap_or_else(|| Self::default_descriptor(identifier)))
        })
    }
}
