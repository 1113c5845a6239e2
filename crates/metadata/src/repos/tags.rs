//! Tag repository.

use crate::error::MetadataResult;
use crate::models::TagRecord;
use crate::stream::RecordStream;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for tags and file/tag associations.
#[async_trait]
pub trait TagRepo: Send + Sync {
    /// Create any of the named tags that do not exist yet.
    ///
    /// Runs in one transaction and returns the id of each input name, in input
    /// order, whether it was created or already present.
    async fn create_tags(&self, names: &[String]) -> MetadataResult<Vec<Uuid>>;

    /// Look up tags by name. Fails with `NotFound` if any name is unknown.
    async fn get_tags(&self, names: &[String]) -> MetadataResult<Vec<TagRecord>>;

    /// Look up a single tag by name.
    async fn find_tag_by_name(&self, name: &str) -> MetadataResult<Option<TagRecord>>;

    /// Attach `added` and detach `removed` in one transaction.
    ///
    /// Every named tag must already exist.
    async fn update_file_tags(
        &self,
        file_id: Uuid,
        added: &[String],
        removed: &[String],
    ) -> MetadataResult<()>;

    /// Put a tag into a category, creating the category if needed, or clear it.
    async fn set_tag_category(
        &self,
        tag_name: &str,
        category: Option<&str>,
    ) -> MetadataResult<TagRecord>;

    /// Stream every tag, ordered by name.
    async fn all_tags(&self) -> MetadataResult<RecordStream<TagRecord>>;

    /// Stream the tags of one file, ordered by name.
    async fn get_tags_for_file(&self, file_id: Uuid) -> MetadataResult<RecordStream<TagRecord>>;
}
