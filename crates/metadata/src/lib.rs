//! Metadata store abstraction and implementations for Folio.
//!
//! This crate provides the catalogue of the archive:
//! - Files with their document date and content hash
//! - Tags, tag categories, and file/tag associations
//! - Content descriptors mapping a hash to the blob holding it
//! - Cancellable record streams for full scans

pub mod error;
pub mod models;
pub mod repos;
pub mod store;
pub mod stream;

pub use error::{MetadataError, MetadataResult};
pub use models::{ContentMetadata, FileRecord, TagCategory, TagRecord};
pub use repos::{ContentRepo, FileRepo, TagRepo};
pub use store::{MetadataStore, SqliteStore};
pub use stream::RecordStream;

use folio_core::config::MetadataConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            max_connections,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(
                path,
                *max_connections,
                Duration::from_secs(*busy_timeout_secs),
            )
            .await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
