//! Shared helpers for metadata integration tests.

use folio_metadata::{FileRecord, FileRepo, MetadataResult, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::Date;

/// A SQLite metadata store in its own temporary directory.
pub struct TestMetadata {
    pub store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        Self::with_max_connections(4).await
    }

    /// Store with a fixed pool size, e.g. 1 to observe connection release.
    pub async fn with_max_connections(max_connections: u32) -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(&db_path, max_connections, Duration::from_secs(5)).await?;

        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    /// Create a file, panicking on failure.
    #[allow(dead_code)]
    pub async fn file(&self, filename: &str, date: Date) -> FileRecord {
        self.store
            .create_file(filename, date)
            .await
            .expect("Failed to create file")
    }
}

/// Owned tag names from string literals.
#[allow(dead_code)]
pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
