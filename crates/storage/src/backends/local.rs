//! Local filesystem blob store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/tmp/<handle id>.dat        staging blobs of open write handles
//! <root>/<c0>/<c1>/<blob id>.dat    permanent blobs, sharded by the first two
//!                                   characters of the hyphenated blob id
//! ```

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobRead, BlobStore, StagingBlob};
use async_trait::async_trait;
use folio_core::HandleId;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Directory holding staging blobs, relative to the root.
const STAGING_DIR: &str = "tmp";

/// File extension of every blob on disk.
const BLOB_EXT: &str = "dat";

/// Local filesystem blob store.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open a blob store rooted at `root`, creating it if needed.
    ///
    /// Fails unless the root is a directory this process can write to.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STAGING_DIR)).await?;

        let store = Self { root };
        store.probe_writable().await?;
        Ok(store)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn probe_writable(&self) -> StorageResult<()> {
        let probe = self
            .root
            .join(STAGING_DIR)
            .join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"probe").await.map_err(|e| {
            StorageError::Config(format!(
                "storage root {} is not writable: {e}",
                self.root.display()
            ))
        })?;
        fs::remove_file(&probe).await?;
        Ok(())
    }

    fn staging_path(&self, handle_id: HandleId) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{handle_id}.{BLOB_EXT}"))
    }

    fn blob_path(&self, blob_id: Uuid) -> PathBuf {
        self.root.join(sharded_key(blob_id))
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs the validation on the blocking pool because it canonicalizes and
    /// stats the filesystem.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || key_path_sync(&root, &key))
            .await
            .map_err(|e| StorageError::Io(io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }
}

fn sharded_key(blob_id: Uuid) -> String {
    let id = blob_id.hyphenated().to_string();
    format!("{}/{}/{id}.{BLOB_EXT}", &id[0..1], &id[1..2])
}

/// Resolve `key` under `root`, rejecting keys that would escape it either
/// lexically or through a symlink.
fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "contains unsafe path component: {key}"
        )));
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    // Check the path itself if it exists, otherwise its nearest existing
    // ancestor, so that a symlinked directory cannot redirect the key.
    let mut candidate = Some(path.as_path());
    while let Some(current) = candidate {
        match std::fs::symlink_metadata(current) {
            Ok(meta) => {
                let canonical = current.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("symlink target missing or invalid: {key}"))
                    } else {
                        StorageError::Io(io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }
        candidate = current.parent();
    }

    Ok(path)
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn blob_key(&self, blob_id: Uuid) -> String {
        sharded_key(blob_id)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn open_blob(&self, blob_id: Uuid) -> StorageResult<Box<dyn BlobRead>> {
        let key = sharded_key(blob_id);
        let path = self.key_path(&key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(e, &key))?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn read_from_offset(&self, key: &str, offset: u64) -> StorageResult<Box<dyn BlobRead>> {
        let path = self.key_path(key).await?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(e, key))?;
        if !file.metadata().await?.is_file() {
            return Err(StorageError::InvalidKey(format!("not a blob: {key}")));
        }
        file.seek(io::SeekFrom::Start(offset)).await?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn open_staging(&self, handle_id: HandleId) -> StorageResult<Box<dyn StagingBlob>> {
        let path = self.staging_path(handle_id);
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists(path.display().to_string())
                } else {
                    StorageError::Io(e)
                }
            })?;
        debug!(path = %path.display(), "opened staging blob");

        Ok(Box::new(LocalStagingBlob {
            file,
            handle_id,
            staging_path: path,
            root: self.root.clone(),
        }))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn blob_exists(&self, blob_id: Uuid) -> StorageResult<bool> {
        fs::try_exists(self.blob_path(blob_id))
            .await
            .map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete_blob(&self, blob_id: Uuid) -> StorageResult<()> {
        let key = sharded_key(blob_id);
        fs::remove_file(self.blob_path(blob_id))
            .await
            .map_err(|e| StorageError::from_io(e, &key))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn purge_staging(&self) -> StorageResult<usize> {
        let dir = self.root.join(STAGING_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            // Symlinks are skipped along with directories.
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }

        if removed > 0 {
            warn!(removed, "purged leftover staging blobs");
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Staging blob backed by a file in `<root>/tmp`.
struct LocalStagingBlob {
    file: fs::File,
    handle_id: HandleId,
    staging_path: PathBuf,
    root: PathBuf,
}

impl LocalStagingBlob {
    async fn persist(&mut self, blob_id: Uuid) -> StorageResult<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let final_path = self.root.join(sharded_key(blob_id));
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&self.staging_path, &final_path).await?;
        Ok(final_path)
    }
}

impl AsyncWrite for LocalStagingBlob {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().file).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_shutdown(cx)
    }
}

#[async_trait]
impl StagingBlob for LocalStagingBlob {
    fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    async fn claim(mut self: Box<Self>, blob_id: Uuid) -> StorageResult<()> {
        match self.persist(blob_id).await {
            Ok(final_path) => {
                info!(
                    handle_id = %self.handle_id,
                    blob_id = %blob_id,
                    path = %final_path.display(),
                    "claimed staging blob"
                );
                Ok(())
            }
            Err(e) => {
                let staging_path = self.staging_path.clone();
                drop(self);
                if let Err(remove_err) = fs::remove_file(&staging_path).await
                    && remove_err.kind() != io::ErrorKind::NotFound
                {
                    warn!(
                        path = %staging_path.display(),
                        error = %remove_err,
                        "failed to remove staging blob after failed claim"
                    );
                }
                Err(e)
            }
        }
    }

    async fn discard(self: Box<Self>) -> StorageResult<()> {
        let LocalStagingBlob {
            file,
            handle_id,
            staging_path,
            ..
        } = *self;
        drop(file);
        match fs::remove_file(&staging_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        debug!(%handle_id, "discarded staging blob");
        Ok(())
    }
}
