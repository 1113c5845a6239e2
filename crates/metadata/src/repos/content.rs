//! Content metadata repository.

use crate::error::MetadataResult;
use crate::models::ContentMetadata;
use async_trait::async_trait;

/// Repository mapping content hashes to blobs.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Find the content descriptor for a hash.
    async fn find_content_by_hash(&self, hash: &str) -> MetadataResult<Option<ContentMetadata>>;

    /// Record a new content descriptor.
    ///
    /// Fails with `AlreadyExists` if the hash is already recorded.
    async fn create_content(&self, content: &ContentMetadata) -> MetadataResult<()>;
}
