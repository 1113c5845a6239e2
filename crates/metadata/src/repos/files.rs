//! File repository.

use crate::error::MetadataResult;
use crate::models::FileRecord;
use crate::stream::RecordStream;
use async_trait::async_trait;
use time::Date;
use uuid::Uuid;

/// Repository for file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Create a file tagged with the default system tag.
    ///
    /// Fails with `AlreadyExists` if `(filename, date)` is taken.
    async fn create_file(&self, filename: &str, date: Date) -> MetadataResult<FileRecord>;

    /// Create a file with the given tags. Every tag must already exist.
    async fn create_file_with_tags(
        &self,
        filename: &str,
        date: Date,
        tags: &[String],
    ) -> MetadataResult<FileRecord>;

    /// Create a file with a caller-chosen id, used when restoring an archive.
    async fn create_file_with_id_and_tags(
        &self,
        id: Uuid,
        filename: &str,
        date: Date,
        tags: &[String],
    ) -> MetadataResult<FileRecord>;

    /// Get a file by id.
    async fn get_file(&self, id: Uuid) -> MetadataResult<Option<FileRecord>>;

    /// Get one file referencing the given content hash.
    async fn get_file_by_hash(&self, hash: &str) -> MetadataResult<Option<FileRecord>>;

    /// Get the file registered under `filename` on `date`.
    async fn get_file_with_date(
        &self,
        filename: &str,
        date: Date,
    ) -> MetadataResult<Option<FileRecord>>;

    /// All files dated `date`, ordered by filename.
    async fn find_files_with_date(&self, date: Date) -> MetadataResult<Vec<FileRecord>>;

    /// Files carrying any of the named tags, each once, ordered by filename.
    async fn find_files_with_tags(&self, tag_names: &[String]) -> MetadataResult<Vec<FileRecord>>;

    /// Files whose id starts with `prefix`, ordered by id.
    async fn find_files_with_id_prefix(&self, prefix: &str) -> MetadataResult<Vec<FileRecord>>;

    /// Distinct document years, ascending.
    async fn get_file_years(&self) -> MetadataResult<Vec<i32>>;

    /// Distinct document months within `year`, ascending.
    async fn get_file_months(&self, year: i32) -> MetadataResult<Vec<u8>>;

    /// Distinct document days within `year`/`month`, ascending.
    async fn get_file_days(&self, year: i32, month: u8) -> MetadataResult<Vec<u8>>;

    /// Set the content hash of a file.
    async fn update_file_hash(&self, id: Uuid, hash: &str) -> MetadataResult<()>;

    /// Rename and/or redate a file.
    ///
    /// Fails with `AlreadyExists` if the destination `(filename, date)` is taken.
    async fn update_file_date(&self, id: Uuid, filename: &str, date: Date) -> MetadataResult<()>;

    /// Delete a file and its tag associations. Content is left in place.
    async fn remove_file(&self, id: Uuid) -> MetadataResult<()>;

    /// Stream every file, ordered by filename.
    async fn all_files(&self) -> MetadataResult<RecordStream<FileRecord>>;
}
