//! Archive error types.

use folio_core::FileMode;
use folio_metadata::MetadataError;
use folio_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the archive engine.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("file {0} is already open")]
    AlreadyOpen(Uuid),

    #[error("cannot {action} a handle opened for {mode}")]
    InvalidModeAction { mode: FileMode, action: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Metadata(MetadataError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for ArchiveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ArchiveError::NotFound(what),
            StorageError::AlreadyExists(what) => ArchiveError::Exists(what),
            StorageError::Config(msg) => ArchiveError::Config(msg),
            other => ArchiveError::Storage(other),
        }
    }
}

impl From<MetadataError> for ArchiveError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => ArchiveError::NotFound(what),
            MetadataError::AlreadyExists(what) => ArchiveError::Exists(what),
            MetadataError::InvalidInput(msg) => ArchiveError::InvalidInput(msg),
            MetadataError::Config(msg) => ArchiveError::Config(msg),
            other => ArchiveError::Metadata(other),
        }
    }
}

impl From<folio_core::Error> for ArchiveError {
    fn from(err: folio_core::Error) -> Self {
        match err {
            folio_core::Error::Config(msg) => ArchiveError::Config(msg),
            other => ArchiveError::InvalidInput(other.to_string()),
        }
    }
}

/// Result type for archive operations.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_and_exists_are_unified() {
        let from_storage: ArchiveError = StorageError::NotFound("blob".into()).into();
        assert!(matches!(from_storage, ArchiveError::NotFound(_)));

        let from_metadata: ArchiveError = MetadataError::AlreadyExists("file".into()).into();
        assert!(matches!(from_metadata, ArchiveError::Exists(_)));

        let io: ArchiveError = StorageError::Io(std::io::Error::other("disk")).into();
        assert!(matches!(io, ArchiveError::Storage(_)));
    }

    #[test]
    fn test_invalid_mode_action_message() {
        let err = ArchiveError::InvalidModeAction {
            mode: FileMode::Read,
            action: "write",
        };
        assert_eq!(err.to_string(), "cannot write a handle opened for read");
    }
}
