use async_trait::async_trait;
use folio_metadata::{
    ContentMetadata, ContentRepo, FileRecord, FileRepo, MetadataError, MetadataResult,
    MetadataStore, RecordStream, SqliteStore, TagRecord, TagRepo,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use time::Date;
use uuid::Uuid;

/// Metadata store that delegates to SQLite but can inject content faults.
///
/// - `fail_create_content` makes every content insert fail with a database error.
/// - `hide_content` makes every hash lookup miss, so a writer believes its
///   content is new even when another writer already recorded it.
/// - `lookup_delay_ms` and `remove_delay_ms` stall hash lookups and file
///   removal, holding a close or a removal open mid-flight.
#[allow(dead_code)]
pub struct FaultyMetadata {
    pub inner: Arc<SqliteStore>,
    pub fail_create_content: AtomicBool,
    pub hide_content: AtomicBool,
    pub create_content_calls: AtomicUsize,
    pub lookup_delay_ms: AtomicU64,
    pub remove_delay_ms: AtomicU64,
}

#[allow(dead_code)]
impl FaultyMetadata {
    pub fn new(inner: Arc<SqliteStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_create_content: AtomicBool::new(false),
            hide_content: AtomicBool::new(false),
            create_content_calls: AtomicUsize::new(0),
            lookup_delay_ms: AtomicU64::new(0),
            remove_delay_ms: AtomicU64::new(0),
        })
    }
}

async fn stall(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl ContentRepo for FaultyMetadata {
    async fn find_content_by_hash(&self, hash: &str) -> MetadataResult<Option<ContentMetadata>> {
        stall(&self.lookup_delay_ms).await;
        if self.hide_content.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_content_by_hash(hash).await
    }

    async fn create_content(&self, content: &ContentMetadata) -> MetadataResult<()> {
        self.create_content_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_content.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal("injected content insert failure".into()));
        }
        self.inner.create_content(content).await
    }
}

#[async_trait]
impl FileRepo for FaultyMetadata {
    async fn create_file(&self, filename: &str, date: Date) -> MetadataResult<FileRecord> {
        self.inner.create_file(filename, date).await
    }

    async fn create_file_with_tags(
        &self,
        filename: &str,
        date: Date,
        tags: &[String],
    ) -> MetadataResult<FileRecord> {
        self.inner.create_file_with_tags(filename, date, tags).await
    }

    async fn create_file_with_id_and_tags(
        &self,
        id: Uuid,
        filename: &str,
        date: Date,
        tags: &[String],
    ) -> MetadataResult<FileRecord> {
        self.inner
            .create_file_with_id_and_tags(id, filename, date, tags)
            .await
    }

    async fn get_file(&self, id: Uuid) -> MetadataResult<Option<FileRecord>> {
        self.inner.get_file(id).await
    }

    async fn get_file_by_hash(&self, hash: &str) -> MetadataResult<Option<FileRecord>> {
        self.inner.get_file_by_hash(hash).await
    }

    async fn get_file_with_date(
        &self,
        filename: &str,
        date: Date,
    ) -> MetadataResult<Option<FileRecord>> {
        self.inner.get_file_with_date(filename, date).await
    }

    async fn find_files_with_date(&self, date: Date) -> MetadataResult<Vec<FileRecord>> {
        self.inner.find_files_with_date(date).await
    }

    async fn find_files_with_tags(&self, tag_names: &[String]) -> MetadataResult<Vec<FileRecord>> {
        self.inner.find_files_with_tags(tag_names).await
    }

    async fn find_files_with_id_prefix(&self, prefix: &str) -> MetadataResult<Vec<FileRecord>> {
        self.inner.find_files_with_id_prefix(prefix).await
    }

    async fn get_file_years(&self) -> MetadataResult<Vec<i32>> {
        self.inner.get_file_years().await
    }

    async fn get_file_months(&self, year: i32) -> MetadataResult<Vec<u8>> {
        self.inner.get_file_months(year).await
    }

    async fn get_file_days(&self, year: i32, month: u8) -> MetadataResult<Vec<u8>> {
        self.inner.get_file_days(year, month).await
    }

    async fn update_file_hash(&self, id: Uuid, hash: &str) -> MetadataResult<()> {
        self.inner.update_file_hash(id, hash).await
    }

    async fn update_file_date(&self, id: Uuid, filename: &str, date: Date) -> MetadataResult<()> {
        self.inner.update_file_date(id, filename, date).await
    }

    async fn remove_file(&self, id: Uuid) -> MetadataResult<()> {
        stall(&self.remove_delay_ms).await;
        self.inner.remove_file(id).await
    }

    async fn all_files(&self) -> MetadataResult<RecordStream<FileRecord>> {
        self.inner.all_files().await
    }
}

#[async_trait]
impl TagRepo for FaultyMetadata {
    async fn create_tags(&self, names: &[String]) -> MetadataResult<Vec<Uuid>> {
        self.inner.create_tags(names).await
    }

    async fn get_tags(&self, names: &[String]) -> MetadataResult<Vec<TagRecord>> {
        self.inner.get_tags(names).await
    }

    async fn find_tag_by_name(&self, name: &str) -> MetadataResult<Option<TagRecord>> {
        self.inner.find_tag_by_name(name).await
    }

    async fn update_file_tags(
        &self,
        file_id: Uuid,
        added: &[String],
        removed: &[String],
    ) -> MetadataResult<()> {
        self.inner.update_file_tags(file_id, added, removed).await
    }

    async fn set_tag_category(
        &self,
        tag_name: &str,
        category: Option<&str>,
    ) -> MetadataResult<TagRecord> {
        self.inner.set_tag_category(tag_name, category).await
    }

    async fn all_tags(&self) -> MetadataResult<RecordStream<TagRecord>> {
        self.inner.all_tags().await
    }

    async fn get_tags_for_file(&self, file_id: Uuid) -> MetadataResult<RecordStream<TagRecord>> {
        self.inner.get_tags_for_file(file_id).await
    }
}

#[async_trait]
impl MetadataStore for FaultyMetadata {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}
