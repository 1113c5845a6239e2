//! The archive engine facade.

use crate::error::{ArchiveError, ArchiveResult};
use crate::handles::{HandleInfo, HandleManager};
use bytes::Bytes;
use folio_core::{AppConfig, ContentHash, FileMode, HandleId};
use folio_metadata::{FileRecord, MetadataStore, RecordStream, TagRecord};
use folio_storage::{BlobRead, BlobStore};
use std::io::SeekFrom;
use std::sync::Arc;
use time::Date;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Content-addressed document archive.
///
/// Owns one blob store, one metadata store and the table of open handles.
/// Clone the `Arc` to share it between tasks.
pub struct Archive {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    handles: HandleManager,
}

impl Archive {
    /// Build an archive over existing stores.
    ///
    /// Staging blobs left behind by a previous process are removed first,
    /// since no handle survives a restart.
    pub async fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> ArchiveResult<Self> {
        let purged = blobs.purge_staging().await?;
        if purged > 0 {
            warn!(purged, "removed stale staging blobs at startup");
        }

        info!(backend = blobs.backend_name(), "archive ready");
        Ok(Self {
            handles: HandleManager::new(blobs.clone(), metadata.clone()),
            blobs,
            metadata,
        })
    }

    /// Build the stores described by `config` and an archive over them.
    pub async fn from_config(config: &AppConfig) -> ArchiveResult<Self> {
        config.validate().map_err(ArchiveError::Config)?;

        let blobs = folio_storage::from_config(&config.storage).await?;
        let metadata = folio_metadata::from_config(&config.metadata).await?;
        Self::new(blobs, metadata).await
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Number of currently open handles.
    pub fn open_count(&self) -> usize {
        self.handles.open_count()
    }

    /// Check both stores.
    pub async fn health_check(&self) -> ArchiveResult<()> {
        self.blobs.health_check().await?;
        self.metadata.health_check().await?;
        Ok(())
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Register a new file tagged `unfiled`. Fails with `Exists` if the
    /// filename is already registered on that date.
    #[instrument(skip(self))]
    pub async fn create_file(&self, filename: &str, date: Date) -> ArchiveResult<FileRecord> {
        validate_filename(filename)?;
        Ok(self.metadata.create_file(filename, date).await?)
    }

    /// Register a new file with the given (existing) tags.
    #[instrument(skip(self))]
    pub async fn create_file_with_tags(
        &self,
        filename: &str,
        date: Date,
        tags: &[String],
    ) -> ArchiveResult<FileRecord> {
        validate_filename(filename)?;
        Ok(self
            .metadata
            .create_file_with_tags(filename, date, tags)
            .await?)
    }

    pub async fn get_file(&self, id: Uuid) -> ArchiveResult<FileRecord> {
        self.metadata
            .get_file(id)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(format!("file {id}")))
    }

    pub async fn get_file_with_date(&self, filename: &str, date: Date) -> ArchiveResult<FileRecord> {
        self.metadata
            .get_file_with_date(filename, date)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(format!("file {filename} on {date}")))
    }

    /// Rename and/or redate a file.
    #[instrument(skip(self))]
    pub async fn update_file_date(&self, id: Uuid, filename: &str, date: Date) -> ArchiveResult<()> {
        validate_filename(filename)?;
        Ok(self.metadata.update_file_date(id, filename, date).await?)
    }

    /// Delete a file record. Refused while a handle is open on it.
    ///
    /// The content blob stays in place; other files may share it.
    #[instrument(skip(self))]
    pub async fn remove_file(&self, id: Uuid) -> ArchiveResult<()> {
        let _hold = self.handles.hold(id)?;
        Ok(self.metadata.remove_file(id).await?)
    }

    // =========================================================================
    // Handles
    // =========================================================================

    pub async fn open_file(&self, file_id: Uuid, mode: FileMode) -> ArchiveResult<HandleId> {
        self.handles.open(file_id, mode).await
    }

    pub async fn read(&self, handle: HandleId, buf: &mut [u8]) -> ArchiveResult<usize> {
        self.handles.read(handle, buf).await
    }

    pub async fn read_at(&self, handle: HandleId, offset: u64, len: usize) -> ArchiveResult<Bytes> {
        self.handles.read_at(handle, offset, len).await
    }

    pub async fn write(&self, handle: HandleId, data: &[u8]) -> ArchiveResult<usize> {
        self.handles.write(handle, data).await
    }

    pub async fn write_all(&self, handle: HandleId, data: &[u8]) -> ArchiveResult<()> {
        self.handles.write_all(handle, data).await
    }

    pub async fn seek(&self, handle: HandleId, pos: SeekFrom) -> ArchiveResult<u64> {
        self.handles.seek(handle, pos).await
    }

    pub async fn flush(&self, handle: HandleId) -> ArchiveResult<()> {
        self.handles.flush(handle).await
    }

    /// Close a handle. Returns the content hash when a write was committed.
    pub async fn close_file(&self, handle: HandleId) -> ArchiveResult<Option<ContentHash>> {
        self.handles.close(handle).await
    }

    /// Drop a handle without committing.
    pub async fn abort_file(&self, handle: HandleId) -> ArchiveResult<()> {
        self.handles.abort(handle).await
    }

    pub async fn handle_info(&self, handle: HandleId) -> ArchiveResult<HandleInfo> {
        self.handles.handle_info(handle).await
    }

    // =========================================================================
    // Direct content streams
    // =========================================================================

    /// Stream a file's committed content from the start.
    pub async fn read_file(&self, id: Uuid) -> ArchiveResult<Box<dyn BlobRead>> {
        self.read_file_from_offset(id, 0).await
    }

    /// Stream a file's committed content starting at `offset`.
    ///
    /// Bypasses the handle table; intended for bulk transfer.
    pub async fn read_file_from_offset(
        &self,
        id: Uuid,
        offset: u64,
    ) -> ArchiveResult<Box<dyn BlobRead>> {
        let file = self.get_file(id).await?;
        if !file.has_content() {
            return Err(ArchiveError::NotFound(format!("file {id} has no content")));
        }
        let content = self
            .metadata
            .find_content_by_hash(&file.hash)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(format!("content {}", file.hash)))?;

        let key = self.blobs.blob_key(content.blob_id);
        Ok(self.blobs.read_from_offset(&key, offset).await?)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn find_files_with_tags(&self, tags: &[String]) -> ArchiveResult<Vec<FileRecord>> {
        Ok(self.metadata.find_files_with_tags(tags).await?)
    }

    pub async fn find_files_with_id_prefix(&self, prefix: &str) -> ArchiveResult<Vec<FileRecord>> {
        Ok(self.metadata.find_files_with_id_prefix(prefix).await?)
    }

    pub async fn find_files_with_date(&self, date: Date) -> ArchiveResult<Vec<FileRecord>> {
        Ok(self.metadata.find_files_with_date(date).await?)
    }

    pub async fn get_file_years(&self) -> ArchiveResult<Vec<i32>> {
        Ok(self.metadata.get_file_years().await?)
    }

    pub async fn get_file_months(&self, year: i32) -> ArchiveResult<Vec<u8>> {
        Ok(self.metadata.get_file_months(year).await?)
    }

    pub async fn get_file_days(&self, year: i32, month: u8) -> ArchiveResult<Vec<u8>> {
        Ok(self.metadata.get_file_days(year, month).await?)
    }

    pub async fn all_files(&self) -> ArchiveResult<RecordStream<FileRecord>> {
        Ok(self.metadata.all_files().await?)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    pub async fn create_tags(&self, names: &[String]) -> ArchiveResult<Vec<Uuid>> {
        Ok(self.metadata.create_tags(names).await?)
    }

    pub async fn get_tags(&self, names: &[String]) -> ArchiveResult<Vec<TagRecord>> {
        Ok(self.metadata.get_tags(names).await?)
    }

    pub async fn update_file_tags(
        &self,
        file_id: Uuid,
        added: &[String],
        removed: &[String],
    ) -> ArchiveResult<()> {
        Ok(self
            .metadata
            .update_file_tags(file_id, added, removed)
            .await?)
    }

    pub async fn find_tag_by_name(&self, name: &str) -> ArchiveResult<TagRecord> {
        self.metadata
            .find_tag_by_name(name)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(format!("tag {name}")))
    }

    pub async fn set_tag_category(
        &self,
        tag_name: &str,
        category: Option<&str>,
    ) -> ArchiveResult<TagRecord> {
        Ok(self.metadata.set_tag_category(tag_name, category).await?)
    }

    pub async fn all_tags(&self) -> ArchiveResult<RecordStream<TagRecord>> {
        Ok(self.metadata.all_tags().await?)
    }

    pub async fn get_tags_for_file(&self, file_id: Uuid) -> ArchiveResult<RecordStream<TagRecord>> {
        Ok(self.metadata.get_tags_for_file(file_id).await?)
    }
}

fn validate_filename(filename: &str) -> ArchiveResult<()> {
    if filename.is_empty() || filename.contains(['/', '\\', '\0']) {
        return Err(ArchiveError::InvalidInput(format!(
            "invalid filename {filename:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("report.pdf").is_ok());
        assert!(validate_filename("scan 2024 (1).tiff").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a\\b").is_err());
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::with_root(temp_dir.path());
        config.metadata = folio_core::MetadataConfig::Sqlite {
            path: temp_dir.path().join("folio.db"),
            max_connections: 0,
            busy_timeout_secs: 5,
        };

        let err = Archive::from_config(&config).await.err().unwrap();
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[tokio::test]
    async fn test_from_config_builds_both_stores() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AppConfig::with_root(temp_dir.path());

        let archive = Archive::from_config(&config).await.unwrap();
        archive.health_check().await.unwrap();
        assert_eq!(archive.blob_store().backend_name(), "local");
        assert!(temp_dir.path().join("folio.db").exists());
    }
}
