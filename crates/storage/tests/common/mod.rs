pub mod fixtures;

use folio_storage::LocalBlobStore;
use tempfile::TempDir;

#[allow(unused_imports)]
pub use fixtures::seeded_bytes;

/// A local blob store living in its own temporary directory.
pub struct TestStore {
    pub store: LocalBlobStore,
    pub dir: TempDir,
}

impl TestStore {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        Self { store, dir }
    }

    /// Number of regular files under the staging directory.
    pub fn staging_count(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("tmp"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
            .count()
    }
}
