//! Archive engine for Folio.
//!
//! Ties a blob store and a metadata store together behind [`Archive`]:
//! - Exclusive open-file handles for reading and writing file content
//! - Content deduplication by SHA-256 when a write handle is closed
//! - File, tag and calendar queries over the catalogue

pub mod archive;
pub mod error;
pub mod handles;

pub use archive::Archive;
pub use error::{ArchiveError, ArchiveResult};
pub use handles::{HandleInfo, HandleManager, MAX_READ_AT_LEN};

pub use folio_core::{ContentHash, FileMode, HandleId};
pub use folio_metadata::{FileRecord, RecordStream, TagRecord};
