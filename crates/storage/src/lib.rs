//! Blob storage abstraction and backends for Folio.
//!
//! This crate provides:
//! - Staging blobs that collect the bytes of an open write handle
//! - Atomic claim of a staging blob into its permanent, immutable location
//! - Seekable reads of permanent blobs
//! - Backends: local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::local::LocalBlobStore;
pub use error::{StorageError, StorageResult};
pub use traits::{BlobRead, BlobStore, StagingBlob};

use folio_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Local { path } => {
            let backend = LocalBlobStore::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
