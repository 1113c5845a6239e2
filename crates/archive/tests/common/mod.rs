//! Shared helpers for archive integration tests.

pub mod mocks;

use folio_archive::Archive;
use folio_metadata::{MetadataStore, SqliteStore};
use folio_storage::{BlobStore, LocalBlobStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An archive whose blobs and database live in one temporary directory.
pub struct TestArchive {
    pub archive: Arc<Archive>,
    pub sqlite: Arc<SqliteStore>,
    pub dir: TempDir,
}

impl TestArchive {
    pub async fn new() -> Self {
        Self::with(|sqlite| sqlite as Arc<dyn MetadataStore>).await
    }

    /// Build an archive whose metadata store is `wrap(sqlite)`, e.g. a mock.
    pub async fn with<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<SqliteStore>) -> Arc<dyn MetadataStore>,
    {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let (blobs, sqlite) = open_stores(dir.path()).await;
        let metadata = wrap(sqlite.clone());
        let archive = Archive::new(blobs, metadata).await.unwrap();

        Self {
            archive: Arc::new(archive),
            sqlite,
            dir,
        }
    }

    /// Number of permanent blobs on disk.
    #[allow(dead_code)]
    pub fn blob_count(&self) -> usize {
        count_blobs(self.dir.path())
    }

    /// Number of files in the staging directory.
    #[allow(dead_code)]
    pub fn staging_count(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("tmp"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
            .count()
    }
}

pub async fn open_stores(root: &Path) -> (Arc<dyn BlobStore>, Arc<SqliteStore>) {
    let blobs = LocalBlobStore::new(root).await.unwrap();
    let sqlite = SqliteStore::new(&root.join("folio.db"), 4, Duration::from_secs(5))
        .await
        .unwrap();
    (Arc::new(blobs), Arc::new(sqlite))
}

/// Count `.dat` files in the sharded layout, skipping the staging directory.
pub fn count_blobs(root: &Path) -> usize {
    fn walk(dir: &Path) -> usize {
        let mut count = 0;
        for entry in std::fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if entry.file_type().unwrap().is_dir() {
                count += walk(&path);
            } else if path.extension().is_some_and(|ext| ext == "dat") {
                count += 1;
            }
        }
        count
    }

    std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_dir() && e.file_name() != "tmp")
        .map(|e| walk(&e.path()))
        .sum()
}

/// Owned strings from string literals.
#[allow(dead_code)]
pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
