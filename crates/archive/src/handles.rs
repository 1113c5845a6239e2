//! Open-file handle manager.
//!
//! A handle binds one file to one stream: the file's committed blob for READ
//! handles, or a fresh staging blob for WRITE handles. At most one handle is
//! live per file. Closing a WRITE handle decides whether the staged bytes are
//! new content (claimed into the blob store and recorded) or a duplicate of
//! existing content (discarded), then points the file at the content hash.

use crate::error::{ArchiveError, ArchiveResult};
use bytes::Bytes;
use folio_core::{ContentHash, FileMode, HandleId, HashingWriter};
use folio_metadata::{ContentMetadata, MetadataError, MetadataStore};
use folio_storage::{BlobRead, BlobStore, StagingBlob};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Largest span a single `read_at` call may return (64 MiB).
pub const MAX_READ_AT_LEN: usize = 64 * 1024 * 1024;

/// Snapshot of an open handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleInfo {
    pub handle_id: HandleId,
    pub file_id: Uuid,
    pub mode: FileMode,
    /// Bytes accepted so far; always 0 for READ handles.
    pub written: u64,
}

enum HandleStream {
    Read(Box<dyn BlobRead>),
    Write(HashingWriter<Box<dyn StagingBlob>>),
}

struct OpenFile {
    handle_id: HandleId,
    file_id: Uuid,
    mode: FileMode,
    /// `None` once close or abort has taken the stream.
    stream: Mutex<Option<HandleStream>>,
}

impl OpenFile {
    fn require(&self, mode: FileMode, action: &'static str) -> ArchiveResult<()> {
        if self.mode != mode {
            return Err(ArchiveError::InvalidModeAction {
                mode: self.mode,
                action,
            });
        }
        Ok(())
    }

    fn closed(&self) -> ArchiveError {
        ArchiveError::NotFound(format!("handle {} is closed", self.handle_id))
    }
}

#[derive(Default)]
struct HandleTable {
    /// Live or reserved handle per file.
    by_file: HashMap<Uuid, HandleId>,
    /// Registered handles. A reserved handle has no entry here yet.
    by_handle: HashMap<HandleId, Arc<OpenFile>>,
}

/// Releases a file reservation unless the handle was registered.
pub(crate) struct Reservation<'a> {
    manager: &'a HandleManager,
    file_id: Uuid,
    handle_id: HandleId,
    armed: bool,
}

impl Reservation<'_> {
    fn register(mut self, stream: HandleStream, mode: FileMode) {
        let open = Arc::new(OpenFile {
            handle_id: self.handle_id,
            file_id: self.file_id,
            mode,
            stream: Mutex::new(Some(stream)),
        });
        self.manager
            .write_table()
            .by_handle
            .insert(self.handle_id, open);
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut table = self.manager.write_table();
            if table.by_file.get(&self.file_id) == Some(&self.handle_id) {
                table.by_file.remove(&self.file_id);
            }
        }
    }
}

/// Tracks open handles and mediates all access to file content.
pub struct HandleManager {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    table: RwLock<HandleTable>,
}

impl HandleManager {
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            blobs,
            metadata,
            table: RwLock::new(HandleTable::default()),
        }
    }

    fn read_table(&self) -> RwLockReadGuard<'_, HandleTable> {
        self.table.read().unwrap_or_else(|poisoned| {
            warn!("handle table RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, HandleTable> {
        self.table.write().unwrap_or_else(|poisoned| {
            warn!("handle table RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn reserve(&self, file_id: Uuid, handle_id: HandleId) -> ArchiveResult<Reservation<'_>> {
        let mut table = self.write_table();
        if table.by_file.contains_key(&file_id) {
            return Err(ArchiveError::AlreadyOpen(file_id));
        }
        table.by_file.insert(file_id, handle_id);
        Ok(Reservation {
            manager: self,
            file_id,
            handle_id,
            armed: true,
        })
    }

    fn lookup(&self, handle_id: HandleId) -> ArchiveResult<Arc<OpenFile>> {
        self.read_table()
            .by_handle
            .get(&handle_id)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(format!("handle {handle_id}")))
    }

    fn deregister(&self, open: &OpenFile) {
        let mut table = self.write_table();
        table.by_handle.remove(&open.handle_id);
        if table.by_file.get(&open.file_id) == Some(&open.handle_id) {
            table.by_file.remove(&open.file_id);
        }
    }

    /// Reserve a file without opening it, keeping handles off it until the
    /// guard is dropped.
    pub(crate) fn hold(&self, file_id: Uuid) -> ArchiveResult<Reservation<'_>> {
        self.reserve(file_id, HandleId::new())
    }

    /// Number of registered handles.
    pub fn open_count(&self) -> usize {
        self.read_table().by_handle.len()
    }

    /// Open a file for reading its committed content or for writing new content.
    #[instrument(skip(self))]
    pub async fn open(&self, file_id: Uuid, mode: FileMode) -> ArchiveResult<HandleId> {
        // Reserve first so the file cannot be removed between lookup and
        // registration. Dropping the reservation on error frees it again.
        let handle_id = HandleId::new();
        let reservation = self.reserve(file_id, handle_id)?;

        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(format!("file {file_id}")))?;

        let blob_id = match mode {
            FileMode::Read => {
                if !file.has_content() {
                    return Err(ArchiveError::NotFound(format!(
                        "file {file_id} has no content"
                    )));
                }
                let content = self
                    .metadata
                    .find_content_by_hash(&file.hash)
                    .await?
                    .ok_or_else(|| ArchiveError::NotFound(format!("content {}", file.hash)))?;
                Some(content.blob_id)
            }
            FileMode::Write => None,
        };

        let stream = match blob_id {
            Some(blob_id) => HandleStream::Read(self.blobs.open_blob(blob_id).await?),
            None => HandleStream::Write(HashingWriter::new(
                self.blobs.open_staging(handle_id).await?,
            )),
        };
        reservation.register(stream, mode);

        debug!(%handle_id, %file_id, %mode, "opened handle");
        Ok(handle_id)
    }

    /// Read into `buf`. Returns 0 at end of content.
    pub async fn read(&self, handle_id: HandleId, buf: &mut [u8]) -> ArchiveResult<usize> {
        let open = self.lookup(handle_id)?;
        open.require(FileMode::Read, "read")?;

        let mut guard = open.stream.lock().await;
        match guard.as_mut() {
            Some(HandleStream::Read(reader)) => Ok(reader.read(buf).await?),
            Some(HandleStream::Write(_)) => unreachable_mode(&open, "read"),
            None => Err(open.closed()),
        }
    }

    /// Read up to `len` bytes starting at `offset`. Shorter only at end of content.
    pub async fn read_at(&self, handle_id: HandleId, offset: u64, len: usize) -> ArchiveResult<Bytes> {
        if len > MAX_READ_AT_LEN {
            return Err(ArchiveError::InvalidInput(format!(
                "read length {len} exceeds maximum {MAX_READ_AT_LEN} bytes"
            )));
        }
        let open = self.lookup(handle_id)?;
        open.require(FileMode::Read, "read")?;

        let mut guard = open.stream.lock().await;
        match guard.as_mut() {
            Some(HandleStream::Read(reader)) => {
                reader.seek(SeekFrom::Start(offset)).await?;
                let mut buf = Vec::with_capacity(len.min(1024 * 1024));
                (&mut *reader).take(len as u64).read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
            Some(HandleStream::Write(_)) => unreachable_mode(&open, "read"),
            None => Err(open.closed()),
        }
    }

    /// Write part of `data`, returning how many bytes the staging blob accepted.
    pub async fn write(&self, handle_id: HandleId, data: &[u8]) -> ArchiveResult<usize> {
        let open = self.lookup(handle_id)?;
        open.require(FileMode::Write, "write")?;

        let mut guard = open.stream.lock().await;
        match guard.as_mut() {
            Some(HandleStream::Write(writer)) => Ok(writer.write(data).await?),
            Some(HandleStream::Read(_)) => unreachable_mode(&open, "write"),
            None => Err(open.closed()),
        }
    }

    /// Write all of `data`.
    pub async fn write_all(&self, handle_id: HandleId, data: &[u8]) -> ArchiveResult<()> {
        let open = self.lookup(handle_id)?;
        open.require(FileMode::Write, "write")?;

        let mut guard = open.stream.lock().await;
        match guard.as_mut() {
            Some(HandleStream::Write(writer)) => Ok(writer.write_all(data).await?),
            Some(HandleStream::Read(_)) => unreachable_mode(&open, "write"),
            None => Err(open.closed()),
        }
    }

    /// Reposition the stream.
    ///
    /// WRITE handles only append, so the only accepted seek is one that
    /// resolves to the current end of the staged bytes.
    pub async fn seek(&self, handle_id: HandleId, pos: SeekFrom) -> ArchiveResult<u64> {
        let open = self.lookup(handle_id)?;

        let mut guard = open.stream.lock().await;
        match guard.as_mut() {
            Some(HandleStream::Read(reader)) => Ok(reader.seek(pos).await?),
            Some(HandleStream::Write(writer)) => {
                let end = writer.written();
                let target = match pos {
                    SeekFrom::Start(n) => Some(n),
                    SeekFrom::Current(delta) | SeekFrom::End(delta) => end.checked_add_signed(delta),
                };
                if target == Some(end) {
                    Ok(end)
                } else {
                    Err(ArchiveError::InvalidModeAction {
                        mode: FileMode::Write,
                        action: "seek",
                    })
                }
            }
            None => Err(open.closed()),
        }
    }

    /// Flush buffered bytes to the underlying stream.
    pub async fn flush(&self, handle_id: HandleId) -> ArchiveResult<()> {
        let open = self.lookup(handle_id)?;

        let mut guard = open.stream.lock().await;
        match guard.as_mut() {
            Some(HandleStream::Write(writer)) => Ok(writer.flush().await?),
            Some(HandleStream::Read(_)) => Ok(()),
            None => Err(open.closed()),
        }
    }

    /// Describe an open handle.
    pub async fn handle_info(&self, handle_id: HandleId) -> ArchiveResult<HandleInfo> {
        let open = self.lookup(handle_id)?;
        let written = match open.stream.lock().await.as_ref() {
            Some(HandleStream::Write(writer)) => writer.written(),
            _ => 0,
        };
        Ok(HandleInfo {
            handle_id: open.handle_id,
            file_id: open.file_id,
            mode: open.mode,
            written,
        })
    }

    /// Close a handle.
    ///
    /// For WRITE handles this commits the staged content and returns its hash.
    /// Once the stream has been taken the handle is gone whatever the outcome,
    /// and the staging blob has been either claimed or removed.
    #[instrument(skip(self))]
    pub async fn close(&self, handle_id: HandleId) -> ArchiveResult<Option<ContentHash>> {
        let open = self.lookup(handle_id)?;
        // Only the call that takes the stream may release the file.
        let Some(stream) = open.stream.lock().await.take() else {
            return Err(open.closed());
        };

        let result = match stream {
            HandleStream::Read(reader) => {
                drop(reader);
                Ok(None)
            }
            HandleStream::Write(writer) => self.commit(&open, writer).await.map(Some),
        };

        self.deregister(&open);
        debug!(%handle_id, file_id = %open.file_id, ok = result.is_ok(), "closed handle");
        result
    }

    /// Drop a handle without committing anything.
    #[instrument(skip(self))]
    pub async fn abort(&self, handle_id: HandleId) -> ArchiveResult<()> {
        let open = self.lookup(handle_id)?;
        let Some(stream) = open.stream.lock().await.take() else {
            return Err(open.closed());
        };

        let result = match stream {
            HandleStream::Read(reader) => {
                drop(reader);
                Ok(())
            }
            HandleStream::Write(writer) => {
                let (staging, _, _) = writer.finish();
                staging.discard().await.map_err(ArchiveError::from)
            }
        };

        self.deregister(&open);
        debug!(%handle_id, file_id = %open.file_id, "aborted handle");
        result
    }

    async fn commit(
        &self,
        open: &OpenFile,
        mut writer: HashingWriter<Box<dyn StagingBlob>>,
    ) -> ArchiveResult<ContentHash> {
        if let Err(e) = writer.flush().await {
            let (staging, _, _) = writer.finish();
            discard_quietly(staging).await;
            return Err(e.into());
        }

        let (staging, hash, size) = writer.finish();
        let hex = hash.to_hex();

        let existing = match self.metadata.find_content_by_hash(&hex).await {
            Ok(existing) => existing,
            Err(e) => {
                discard_quietly(staging).await;
                return Err(e.into());
            }
        };

        match existing {
            Some(content) => {
                staging.discard().await?;
                debug!(hash = %hex, blob_id = %content.blob_id, "content already stored");
            }
            None => {
                let blob_id = Uuid::new_v4();
                staging.claim(blob_id).await?;

                let content = ContentMetadata {
                    blob_id,
                    hash: hex.clone(),
                    size,
                };
                match self.metadata.create_content(&content).await {
                    Ok(()) => {
                        info!(hash = %hex, %blob_id, size, "stored new content");
                    }
                    Err(MetadataError::AlreadyExists(_)) => {
                        debug!(hash = %hex, "identical content was stored concurrently");
                        self.rollback_claim(blob_id).await;
                    }
                    Err(e) => {
                        self.rollback_claim(blob_id).await;
                        return Err(e.into());
                    }
                }
            }
        }

        self.metadata.update_file_hash(open.file_id, &hex).await?;
        Ok(hash)
    }

    async fn rollback_claim(&self, blob_id: Uuid) {
        if let Err(e) = self.blobs.delete_blob(blob_id).await {
            warn!(%blob_id, error = %e, "failed to delete claimed blob during rollback");
        }
    }
}

async fn discard_quietly(staging: Box<dyn StagingBlob>) {
    let handle_id = staging.handle_id();
    if let Err(e) = staging.discard().await {
        warn!(%handle_id, error = %e, "failed to discard staging blob");
    }
}

fn unreachable_mode<T>(open: &OpenFile, action: &'static str) -> ArchiveResult<T> {
    Err(ArchiveError::InvalidModeAction {
        mode: open.mode,
        action,
    })
}
