//! Database models mapping to the metadata schema.
//!
//! Identifiers are stored as hyphenated lowercase UUID text so that id-prefix
//! lookups can compare against what users see.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use time::Date;
use uuid::Uuid;

/// Render an id the way it is stored.
pub(crate) fn id_text(id: Uuid) -> String {
    id.hyphenated().to_string()
}

fn decode_id(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let text: String = row.try_get(column)?;
    Uuid::parse_str(&text).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn decode_size(row: &SqliteRow, column: &str) -> Result<u64, sqlx::Error> {
    let size: i64 = row.try_get(column)?;
    u64::try_from(size).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

// =============================================================================
// Files
// =============================================================================

/// A logical document in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    pub filename: String,
    pub document_date: Date,
    /// Lowercase hex SHA-256 of the content, empty until the first write is closed.
    pub hash: String,
    /// Size of the content in bytes, 0 when there is none.
    pub size: u64,
}

impl FileRecord {
    /// Whether content has been committed for this file.
    pub fn has_content(&self) -> bool {
        !self.hash.is_empty()
    }
}

impl<'r> FromRow<'r, SqliteRow> for FileRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: decode_id(row, "id")?,
            filename: row.try_get("filename")?,
            document_date: row.try_get("document_date")?,
            hash: row.try_get("hash")?,
            size: decode_size(row, "size")?,
        })
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Grouping for tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCategory {
    pub id: Uuid,
    pub name: String,
}

/// A label attachable to files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub id: Uuid,
    pub name: String,
    /// System tags are managed by the archive itself, e.g. `unfiled`.
    pub system: bool,
    pub category: Option<TagCategory>,
}

impl<'r> FromRow<'r, SqliteRow> for TagRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let category_id: Option<String> = row.try_get("category_id")?;
        let category = match category_id {
            Some(_) => Some(TagCategory {
                id: decode_id(row, "category_id")?,
                name: row.try_get("category_name")?,
            }),
            None => None,
        };

        Ok(Self {
            id: decode_id(row, "id")?,
            name: row.try_get("name")?,
            system: row.try_get("system")?,
            category,
        })
    }
}

// =============================================================================
// Content
// =============================================================================

/// Physical content descriptor. At most one exists per hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMetadata {
    /// Identifier of the blob holding the bytes.
    pub blob_id: Uuid,
    pub hash: String,
    pub size: u64,
}

impl<'r> FromRow<'r, SqliteRow> for ContentMetadata {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            blob_id: decode_id(row, "blob_id")?,
            hash: row.try_get("hash")?,
            size: decode_size(row, "size")?,
        })
    }
}
