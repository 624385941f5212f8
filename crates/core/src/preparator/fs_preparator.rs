//! Filesystem preparator implementation.
//!
//! Products are copied from their catalog location into a per-item staging
//! directory, passed through customization unchanged, and moved into the
//! delivery tree.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use super::config::PreparatorConfig;
use super::error::PreparatorError;
use super::traits::Preparator;
use super::types::{CustomizedArtifact, FetchedArtifact, ItemContext, PlacementResult};
use crate::catalog::ProductDescriptor;
use crate::order::SelectedOption;

/// Filesystem based preparator.
pub struct FsPreparator {
    config: PreparatorConfig,
    cancelled: Arc<Mutex<HashSet<String>>>,
}

impl FsPreparator {
    pub fn new(config: PreparatorConfig) -> Self {
        Self {
            config,
            cancelled: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn is_cancelled(&self, item_id: &str) -> bool {
        match self.cancelled.lock() {
            Ok(set) => set.contains(item_id),
            Err(poisoned) => poisoned.into_inner().contains(item_id),
        }
    }

    fn mark_cancelled(&self, item_id: &str, cancelled: bool) {
        let mut set = match self.cancelled.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cancelled {
            set.insert(item_id.to_string());
        } else {
            set.remove(item_id);
        }
    }

    fn staging_dir(&self, item_id: &str) -> PathBuf {
        self.config.staging_dir.join(safe_component(item_id))
    }

    fn delivery_path(&self, ctx: &ItemContext, file_name: &str) -> PathBuf {
        self.config
            .delivery_dir
            .join(safe_component(&ctx.user))
            .join(safe_component(&ctx.order_id))
            .join(safe_component(file_name))
    }

    /// Attempts to move a file atomically (rename).
    ///
    /// Returns false when source and destination are on different devices.
    async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, std::io::Error> {
        match fs::rename(source, destination).await {
            Ok(()) => Ok(true),
            Err(e) => {
                // EXDEV is 18 on Linux
                if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Copies a file chunk by chunk, stopping if the item gets cancelled.
    async fn copy_file(
        &self,
        item_id: &str,
        source: &Path,
        destination: &Path,
    ) -> Result<u64, PreparatorError> {
        let source_file = File::open(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PreparatorError::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                PreparatorError::transfer_failed(source, destination, e)
            }
        })?;
        let dest_file = File::create(destination)
            .await
            .map_err(|e| PreparatorError::transfer_failed(source, destination, e))?;

        let mut reader = BufReader::with_capacity(self.config.buffer_size, source_file);
        let mut writer = BufWriter::with_capacity(self.config.buffer_size, dest_file);
        let mut buffer = vec![0u8; self.config.buffer_size];
        let mut total_bytes = 0u64;

        loop {
            if self.is_cancelled(item_id) {
                drop(writer);
                let _ = fs::remove_file(destination).await;
                return Err(PreparatorError::Cancelled);
            }

            let bytes_read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| PreparatorError::transfer_failed(source, destination, e))?;
            if bytes_read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..bytes_read])
                .await
                .map_err(|e| PreparatorError::transfer_failed(source, destination, e))?;
            total_bytes += bytes_read as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| PreparatorError::transfer_failed(source, destination, e))?;
        Ok(total_bytes)
    }

    async fn sha256(&self, path: &Path) -> Result<String, PreparatorError> {
        let file = File::open(path).await?;
        let mut reader = BufReader::with_capacity(self.config.buffer_size, file);
        let mut buffer = vec![0u8; self.config.buffer_size];
        let mut hasher = Sha256::new();
        loop {
            let bytes_read = reader.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Turn an arbitrary name into a single safe path component.
fn safe_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Local path for a catalog location (`file://` URLs or plain paths).
fn source_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

#[async_trait]
impl Preparator for FsPreparator {
    fn name(&self) -> &str {
        "fs"
    }

    async fn fetch(
        &self,
        ctx: &ItemContext,
        descriptor: &ProductDescriptor,
    ) -> Result<FetchedArtifact, PreparatorError> {
        if self.is_cancelled(&ctx.item_id) {
            return Err(PreparatorError::Cancelled);
        }

        let source = source_path(&descriptor.location);
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(PreparatorError::SourceNotFound { path: source });
        }

        let staging = self.staging_dir(&ctx.item_id);
        fs::create_dir_all(&staging).await?;

        let file_name = descriptor.delivery_name();
        let destination = staging.join(safe_component(&file_name));
        debug!(
            "Fetching {} for item {} into {}",
            source.display(),
            ctx.item_id,
            destination.display()
        );
        let size_bytes = self.copy_file(&ctx.item_id, &source, &destination).await?;

        Ok(FetchedArtifact {
            item_id: ctx.item_id.clone(),
            path: destination,
            file_name,
            size_bytes,
        })
    }

    async fn customize(
        &self,
        ctx: &ItemContext,
        artifact: &FetchedArtifact,
        options: &[SelectedOption],
    ) -> Result<CustomizedArtifact, PreparatorError> {
        if !options.is_empty() {
            debug!(
                "Item {}: recording {} options, data passed through unchanged",
                ctx.item_id,
                options.len()
            );
        }
        if !fs::try_exists(&artifact.path).await.unwrap_or(false) {
            return Err(PreparatorError::Fatal(format!(
                "staged artifact missing: {}",
                artifact.path.display()
            )));
        }
        Ok(CustomizedArtifact::passthrough(artifact, options))
    }

    async fn place(
        &self,
        ctx: &ItemContext,
        artifact: &CustomizedArtifact,
    ) -> Result<PlacementResult, PreparatorError> {
        let destination = self.delivery_path(ctx, &artifact.file_name);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let moved = if self.config.prefer_atomic_moves {
            Self::try_atomic_move(&artifact.path, &destination)
                .await
                .map_err(|e| PreparatorError::transfer_failed(&artifact.path, &destination, e))?
        } else {
            false
        };
        if !moved {
            self.copy_file(&ctx.item_id, &artifact.path, &destination)
                .await?;
        }

        let size_bytes = fs::metadata(&destination).await?.len();
        let checksum = if self.config.verify_checksums {
            Some(self.sha256(&destination).await?)
        } else {
            None
        };

        let staging = self.staging_dir(&ctx.item_id);
        if let Err(e) = fs::remove_dir_all(&staging).await {
            // Delivery succeeded; leftover staging is only logged
            warn!("Failed to clean staging {}: {}", staging.display(), e);
        }

        Ok(PlacementResult {
            path: destination,
            size_bytes,
            checksum,
        })
    }

    async fn cancel(&self, item_id: &str) {
        // Marked only while staging is cleaned; a cancelled item never comes back.
        self.mark_cancelled(item_id, true);
        let staging = self.staging_dir(item_id);
        if fs::try_exists(&staging).await.unwrap_or(false) {
            if let Err(e) = fs::remove_dir_all(&staging).await {
                warn!("Failed to clean staging {}: {}", staging.display(), e);
            }
        }
        self.mark_cancelled(item_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        source_dir: PathBuf,
        preparator: FsPreparator,
        config: PreparatorConfig,
    }

    fn fixture(config: impl FnOnce(PreparatorConfig) -> PreparatorConfig) -> Fixture {
        let root = TempDir::new().unwrap();
        let source_dir = root.path().join("archive");
        std::fs::create_dir_all(&source_dir).unwrap();
        let config = config(PreparatorConfig::new(
            root.path().join("staging"),
            root.path().join("delivery"),
        ));
        Fixture {
            preparator: FsPreparator::new(config.clone()),
            _root: root,
            source_dir,
            config,
        }
    }

    fn ctx(item_id: &str) -> ItemContext {
        ItemContext {
            order_id: "o-1".to_string(),
            item_id: item_id.to_string(),
            user: "alice".to_string(),
            identifier: "p-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_full_preparation() {
        let fx = fixture(|c| c.with_checksum_verification(true));
        let source = fx.source_dir.join("p-1.tif");
        std::fs::write(&source, b"pixels").unwrap();
        let descriptor = ProductDescriptor::new("p-1", source.to_string_lossy());
        let ctx = ctx("i-1");

        let fetched = fx.preparator.fetch(&ctx, &descriptor).await.unwrap();
        assert_eq!(fetched.size_bytes, 6);
        assert!(fetched.path.starts_with(&fx.config.staging_dir));

        let customized = fx.preparator.customize(&ctx, &fetched, &[]).await.unwrap();
        assert_eq!(customized.path, fetched.path);

        let placed = fx.preparator.place(&ctx, &customized).await.unwrap();
        assert_eq!(
            placed.path,
            fx.config.delivery_dir.join("alice").join("o-1").join("p-1.tif")
        );
        assert_eq!(std::fs::read(&placed.path).unwrap(), b"pixels");
        assert_eq!(placed.checksum.as_ref().map(String::len), Some(64));
        assert!(!fx.config.staging_dir.join("i-1").exists());
        // The archive copy is untouched
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_place_with_copy() {
        let fx = fixture(|c| c.with_atomic_moves(false).with_buffer_size(4));
        let source = fx.source_dir.join("p-2.nc");
        std::fs::write(&source, b"0123456789").unwrap();
        let ctx = ctx("i-2");

        let fetched = fx
            .preparator
            .fetch(&ctx, &ProductDescriptor::new("p-2", format!("file://{}", source.display())))
            .await
            .unwrap();
        let customized = fx.preparator.customize(&ctx, &fetched, &[]).await.unwrap();
        let placed = fx.preparator.place(&ctx, &customized).await.unwrap();

        assert_eq!(placed.size_bytes, 10);
        assert_eq!(placed.checksum, None);
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let fx = fixture(|c| c);
        let descriptor = ProductDescriptor::new("p-3", "/nonexistent/p-3.tif");

        let err = fx.preparator.fetch(&ctx("i-3"), &descriptor).await.unwrap_err();
        assert!(matches!(err, PreparatorError::SourceNotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_customize_records_options() {
        let fx = fixture(|c| c);
        let source = fx.source_dir.join("p-4.tif");
        std::fs::write(&source, b"data").unwrap();
        let ctx = ctx("i-4");
        let fetched = fx
            .preparator
            .fetch(&ctx, &ProductDescriptor::new("p-4", source.to_string_lossy()))
            .await
            .unwrap();

        let options = vec![SelectedOption::new("format", "NetCDF")];
        let customized = fx.preparator.customize(&ctx, &fetched, &options).await.unwrap();
        assert_eq!(customized.applied_options, options);
        assert_eq!(std::fs::read(&customized.path).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_marked_item_does_not_fetch() {
        let fx = fixture(|c| c);
        let source = fx.source_dir.join("p-5.tif");
        std::fs::write(&source, b"data").unwrap();

        fx.preparator.mark_cancelled("i-5", true);
        let err = fx
            .preparator
            .fetch(&ctx("i-5"), &ProductDescriptor::new("p-5", source.to_string_lossy()))
            .await
            .unwrap_err();
        assert!(matches!(err, PreparatorError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_cleans_staging_and_forgets_item() {
        let fx = fixture(|c| c);
        let source = fx.source_dir.join("p-6.tif");
        std::fs::write(&source, b"data").unwrap();
        let descriptor = ProductDescriptor::new("p-6", source.to_string_lossy());

        let fetched = fx.preparator.fetch(&ctx("i-6"), &descriptor).await.unwrap();
        assert!(fetched.path.exists());

        fx.preparator.cancel("i-6").await;
        assert!(!fx.config.staging_dir.join("i-6").exists());
        assert!(!fx.preparator.is_cancelled("i-6"));
        assert!(fx.preparator.cancelled.lock().unwrap().is_empty());
    }

    #[test]
    fn test_safe_component() {
        assert_eq!(safe_component("alice"), "alice");
        assert_eq!(safe_component("../etc"), ".._etc");
        assert_eq!(safe_component(".."), "_");
        assert_eq!(safe_component(""), "_");
    }
}
