//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use folio_core::HandleId;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use uuid::Uuid;

/// A readable, seekable blob stream.
pub trait BlobRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> BlobRead for T {}

/// Write-only staging area for the content of one write handle.
///
/// Bytes written here are not visible to readers until the blob is claimed.
/// Exactly one of [`StagingBlob::claim`] or [`StagingBlob::discard`] ends its
/// lifetime; dropping it without either leaves the staging file for
/// [`BlobStore::purge_staging`].
#[async_trait]
pub trait StagingBlob: AsyncWrite + Send + Unpin {
    /// The handle this staging blob belongs to.
    fn handle_id(&self) -> HandleId;

    /// Make the staged bytes durable and move them to the permanent location of
    /// `blob_id`. On failure the staging file is removed.
    async fn claim(self: Box<Self>, blob_id: Uuid) -> StorageResult<()>;

    /// Delete the staged bytes.
    async fn discard(self: Box<Self>) -> StorageResult<()>;
}

/// Blob store abstraction for content-addressed file bodies.
///
/// Permanent blobs are immutable once claimed and are addressed by a blob id
/// that the metadata layer associates with a content hash.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store-relative key of a permanent blob.
    fn blob_key(&self, blob_id: Uuid) -> String;

    /// Open a permanent blob for streaming reads.
    async fn open_blob(&self, blob_id: Uuid) -> StorageResult<Box<dyn BlobRead>>;

    /// Open an arbitrary store-relative key positioned at `offset`.
    async fn read_from_offset(&self, key: &str, offset: u64) -> StorageResult<Box<dyn BlobRead>>;

    /// Create the staging blob for a write handle.
    async fn open_staging(&self, handle_id: HandleId) -> StorageResult<Box<dyn StagingBlob>>;

    /// Check whether a permanent blob exists.
    async fn blob_exists(&self, blob_id: Uuid) -> StorageResult<bool>;

    /// Delete a permanent blob.
    async fn delete_blob(&self, blob_id: Uuid) -> StorageResult<()>;

    /// Remove every staging blob. Returns how many were removed.
    ///
    /// Only safe while no write handle is live, i.e. at startup.
    async fn purge_staging(&self) -> StorageResult<usize>;

    /// Static identifier of the backend type, used in logs.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and usable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
