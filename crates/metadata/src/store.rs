//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ContentRepo, FileRepo, TagRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + TagRepo + ContentRepo + Send + Sync {
    /// Create the schema and seed system rows. Idempotent.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Id of the seeded `unfiled` system tag.
pub const UNFILED_TAG_ID: &str = "00000000-0000-0000-0000-000000000001";

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    ///
    /// Record streams hold a pooled connection until they finish or are
    /// closed, so `max_connections` bounds how many can be open at once.
    pub async fn new(
        path: impl AsRef<Path>,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        if max_connections == 0 {
            return Err(MetadataError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(
            path = %path.display(),
            max_connections,
            "opened sqlite metadata store"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::stream::RecordStream;
    use folio_core::TAG_UNFILED;
    use sqlx::{Sqlite, Transaction};
    use std::collections::HashMap;
    use time::Date;
    use uuid::Uuid;

    const FILE_SELECT: &str = r#"
        SELECT f.id, f.filename, f.document_date, f.hash, ifnull(cm.size, 0) AS size
        FROM files f
        LEFT JOIN content_metadata cm ON cm.hash = f.hash
    "#;

    const TAG_SELECT: &str = r#"
        SELECT t.id, t.name, t.system, t.category_id, c.name AS category_name
        FROM tags t
        LEFT JOIN tag_categories c ON c.id = t.category_id
    "#;

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    fn require_filename(filename: &str) -> MetadataResult<()> {
        if filename.is_empty() {
            return Err(MetadataError::InvalidInput("empty file name".to_string()));
        }
        Ok(())
    }

    /// Resolve tag names to ids inside a transaction, failing on unknown names.
    async fn resolve_tag_ids(
        tx: &mut Transaction<'_, Sqlite>,
        names: &[String],
    ) -> MetadataResult<HashMap<String, Uuid>> {
        let mut ids = HashMap::with_capacity(names.len());
        if names.is_empty() {
            return Ok(ids);
        }

        let sql = format!(
            "SELECT id, name FROM tags WHERE name IN ({})",
            placeholders(names.len())
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for name in names {
            query = query.bind(name);
        }
        for (id, name) in query.fetch_all(&mut **tx).await? {
            let id = Uuid::parse_str(&id).map_err(|e| {
                MetadataError::Internal(format!("corrupt tag id for '{name}': {e}"))
            })?;
            ids.insert(name, id);
        }

        let missing: Vec<&str> = names
            .iter()
            .filter(|n| !ids.contains_key(n.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(MetadataError::NotFound(format!(
                "tags not found: {}",
                missing.join(", ")
            )));
        }
        Ok(ids)
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, filename: &str, date: Date) -> MetadataResult<FileRecord> {
            self.create_file_with_tags(filename, date, &[TAG_UNFILED.to_string()])
                .await
        }

        async fn create_file_with_tags(
            &self,
            filename: &str,
            date: Date,
            tags: &[String],
        ) -> MetadataResult<FileRecord> {
            self.create_file_with_id_and_tags(Uuid::new_v4(), filename, date, tags)
                .await
        }

        async fn create_file_with_id_and_tags(
            &self,
            id: Uuid,
            filename: &str,
            date: Date,
            tags: &[String],
        ) -> MetadataResult<FileRecord> {
            require_filename(filename)?;

            // Write first so the transaction holds the write lock before it reads.
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "INSERT INTO files (id, filename, document_date, hash) VALUES (?, ?, ?, '')",
            )
            .bind(id_text(id))
            .bind(filename)
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || format!("file '{filename}' dated {date}"))
            })?;

            let tag_ids = resolve_tag_ids(&mut tx, tags).await?;

            for tag_id in tag_ids.values() {
                sqlx::query("INSERT OR IGNORE INTO file_tags (file_id, tag_id) VALUES (?, ?)")
                    .bind(id_text(id))
                    .bind(id_text(*tag_id))
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;

            Ok(FileRecord {
                id,
                filename: filename.to_string(),
                document_date: date,
                hash: String::new(),
                size: 0,
            })
        }

        async fn get_file(&self, id: Uuid) -> MetadataResult<Option<FileRecord>> {
            let sql = format!("{FILE_SELECT} WHERE f.id = ?");
            let row = sqlx::query_as::<_, FileRecord>(&sql)
                .bind(id_text(id))
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_file_by_hash(&self, hash: &str) -> MetadataResult<Option<FileRecord>> {
            if hash.is_empty() {
                return Ok(None);
            }
            let sql = format!("{FILE_SELECT} WHERE f.hash = ? ORDER BY f.filename LIMIT 1");
            let row = sqlx::query_as::<_, FileRecord>(&sql)
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_file_with_date(
            &self,
            filename: &str,
            date: Date,
        ) -> MetadataResult<Option<FileRecord>> {
            require_filename(filename)?;
            let sql = format!("{FILE_SELECT} WHERE f.filename = ? AND f.document_date = ?");
            let row = sqlx::query_as::<_, FileRecord>(&sql)
                .bind(filename)
                .bind(date)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn find_files_with_date(&self, date: Date) -> MetadataResult<Vec<FileRecord>> {
            let sql = format!("{FILE_SELECT} WHERE f.document_date = ? ORDER BY f.filename");
            let rows = sqlx::query_as::<_, FileRecord>(&sql)
                .bind(date)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn find_files_with_tags(
            &self,
            tag_names: &[String],
        ) -> MetadataResult<Vec<FileRecord>> {
            if tag_names.is_empty() {
                return Ok(Vec::new());
            }

            let sql = format!(
                r#"
                SELECT DISTINCT f.id, f.filename, f.document_date, f.hash, ifnull(cm.size, 0) AS size
                FROM files f
                LEFT JOIN content_metadata cm ON cm.hash = f.hash
                INNER JOIN file_tags ft ON ft.file_id = f.id
                INNER JOIN tags t ON t.id = ft.tag_id
                WHERE t.name IN ({})
                ORDER BY f.filename, f.document_date
                "#,
                placeholders(tag_names.len())
            );
            let mut query = sqlx::query_as::<_, FileRecord>(&sql);
            for name in tag_names {
                query = query.bind(name);
            }
            Ok(query.fetch_all(&self.pool).await?)
        }

        async fn find_files_with_id_prefix(
            &self,
            prefix: &str,
        ) -> MetadataResult<Vec<FileRecord>> {
            let prefix = prefix.to_ascii_lowercase();
            let sql = format!("{FILE_SELECT} WHERE substr(f.id, 1, ?) = ? ORDER BY f.id");
            let rows = sqlx::query_as::<_, FileRecord>(&sql)
                .bind(prefix.len() as i64)
                .bind(&prefix)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn get_file_years(&self) -> MetadataResult<Vec<i32>> {
            let years: Vec<i64> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT CAST(strftime('%Y', document_date) AS INTEGER) AS document_year
                FROM files
                ORDER BY document_year
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(years.into_iter().map(|y| y as i32).collect())
        }

        async fn get_file_months(&self, year: i32) -> MetadataResult<Vec<u8>> {
            let months: Vec<i64> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT CAST(strftime('%m', document_date) AS INTEGER) AS document_month
                FROM files
                WHERE CAST(strftime('%Y', document_date) AS INTEGER) = ?
                ORDER BY document_month
                "#,
            )
            .bind(year)
            .fetch_all(&self.pool)
            .await?;
            Ok(months.into_iter().map(|m| m as u8).collect())
        }

        async fn get_file_days(&self, year: i32, month: u8) -> MetadataResult<Vec<u8>> {
            let days: Vec<i64> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT CAST(strftime('%d', document_date) AS INTEGER) AS document_day
                FROM files
                WHERE CAST(strftime('%Y', document_date) AS INTEGER) = ?
                  AND CAST(strftime('%m', document_date) AS INTEGER) = ?
                ORDER BY document_day
                "#,
            )
            .bind(year)
            .bind(i32::from(month))
            .fetch_all(&self.pool)
            .await?;
            Ok(days.into_iter().map(|d| d as u8).collect())
        }

        async fn update_file_hash(&self, id: Uuid, hash: &str) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE files SET hash = ? WHERE id = ?")
                .bind(hash)
                .bind(id_text(id))
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {id} not found")));
            }
            Ok(())
        }

        async fn update_file_date(
            &self,
            id: Uuid,
            filename: &str,
            date: Date,
        ) -> MetadataResult<()> {
            require_filename(filename)?;
            let result =
                sqlx::query("UPDATE files SET filename = ?, document_date = ? WHERE id = ?")
                    .bind(filename)
                    .bind(date)
                    .bind(id_text(id))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        MetadataError::from_insert(e, || format!("file '{filename}' dated {date}"))
                    })?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {id} not found")));
            }
            Ok(())
        }

        async fn remove_file(&self, id: Uuid) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
                .bind(id_text(id))
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(id_text(id))
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {id} not found")));
            }
            tx.commit().await?;
            Ok(())
        }

        async fn all_files(&self) -> MetadataResult<RecordStream<FileRecord>> {
            Ok(RecordStream::spawn(
                self.pool.clone(),
                format!("{FILE_SELECT} ORDER BY f.filename, f.document_date"),
                Vec::new(),
            ))
        }
    }

    #[async_trait]
    impl TagRepo for SqliteStore {
        async fn create_tags(&self, names: &[String]) -> MetadataResult<Vec<Uuid>> {
            if let Some(empty) = names.iter().position(|n| n.trim().is_empty()) {
                return Err(MetadataError::InvalidInput(format!(
                    "tag name at position {empty} is empty"
                )));
            }

            let mut tx = self.pool.begin().await?;
            let mut ids = Vec::with_capacity(names.len());

            for name in names {
                sqlx::query("INSERT INTO tags (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
                    .bind(id_text(Uuid::new_v4()))
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;

                let id: String = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
                    .bind(name)
                    .fetch_one(&mut *tx)
                    .await?;
                let id = Uuid::parse_str(&id).map_err(|e| {
                    MetadataError::Internal(format!("corrupt tag id for '{name}': {e}"))
                })?;
                ids.push(id);
            }

            tx.commit().await?;
            Ok(ids)
        }

        async fn get_tags(&self, names: &[String]) -> MetadataResult<Vec<TagRecord>> {
            if names.is_empty() {
                return Ok(Vec::new());
            }

            let sql = format!("{TAG_SELECT} WHERE t.name IN ({})", placeholders(names.len()));
            let mut query = sqlx::query_as::<_, TagRecord>(&sql);
            for name in names {
                query = query.bind(name);
            }
            let mut by_name: HashMap<String, TagRecord> = query
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|tag| (tag.name.clone(), tag))
                .collect();

            let missing: Vec<&str> = names
                .iter()
                .filter(|n| !by_name.contains_key(n.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(MetadataError::NotFound(format!(
                    "tags not found: {}",
                    missing.join(", ")
                )));
            }

            // Input order, duplicates collapsed.
            let mut tags = Vec::with_capacity(by_name.len());
            for name in names {
                if let Some(tag) = by_name.remove(name) {
                    tags.push(tag);
                }
            }
            Ok(tags)
        }

        async fn find_tag_by_name(&self, name: &str) -> MetadataResult<Option<TagRecord>> {
            let sql = format!("{TAG_SELECT} WHERE t.name = ?");
            let row = sqlx::query_as::<_, TagRecord>(&sql)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn update_file_tags(
            &self,
            file_id: Uuid,
            added: &[String],
            removed: &[String],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            // No-op update: takes the write lock and checks the file exists.
            let touched = sqlx::query("UPDATE files SET id = id WHERE id = ?")
                .bind(id_text(file_id))
                .execute(&mut *tx)
                .await?;
            if touched.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }

            let all: Vec<String> = added.iter().chain(removed.iter()).cloned().collect();
            let tag_ids = resolve_tag_ids(&mut tx, &all).await?;

            for name in added {
                sqlx::query("INSERT OR IGNORE INTO file_tags (file_id, tag_id) VALUES (?, ?)")
                    .bind(id_text(file_id))
                    .bind(id_text(tag_ids[name]))
                    .execute(&mut *tx)
                    .await?;
            }
            for name in removed {
                sqlx::query("DELETE FROM file_tags WHERE file_id = ? AND tag_id = ?")
                    .bind(id_text(file_id))
                    .bind(id_text(tag_ids[name]))
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn set_tag_category(
            &self,
            tag_name: &str,
            category: Option<&str>,
        ) -> MetadataResult<TagRecord> {
            let mut tx = self.pool.begin().await?;

            let category_id = match category {
                Some(name) if name.trim().is_empty() => {
                    return Err(MetadataError::InvalidInput(
                        "empty category name".to_string(),
                    ));
                }
                Some(name) => {
                    sqlx::query(
                        "INSERT INTO tag_categories (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
                    )
                    .bind(id_text(Uuid::new_v4()))
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
                    let id: String =
                        sqlx::query_scalar("SELECT id FROM tag_categories WHERE name = ?")
                            .bind(name)
                            .fetch_one(&mut *tx)
                            .await?;
                    Some(id)
                }
                None => None,
            };

            let result = sqlx::query("UPDATE tags SET category_id = ? WHERE name = ?")
                .bind(category_id)
                .bind(tag_name)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("tag '{tag_name}' not found")));
            }

            let sql = format!("{TAG_SELECT} WHERE t.name = ?");
            let tag = sqlx::query_as::<_, TagRecord>(&sql)
                .bind(tag_name)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(tag)
        }

        async fn all_tags(&self) -> MetadataResult<RecordStream<TagRecord>> {
            Ok(RecordStream::spawn(
                self.pool.clone(),
                format!("{TAG_SELECT} ORDER BY t.name"),
                Vec::new(),
            ))
        }

        async fn get_tags_for_file(
            &self,
            file_id: Uuid,
        ) -> MetadataResult<RecordStream<TagRecord>> {
            let sql = format!(
                "{TAG_SELECT} INNER JOIN file_tags ft ON ft.tag_id = t.id WHERE ft.file_id = ? ORDER BY t.name"
            );
            Ok(RecordStream::spawn(
                self.pool.clone(),
                sql,
                vec![id_text(file_id)],
            ))
        }
    }

    #[async_trait]
    impl ContentRepo for SqliteStore {
        async fn find_content_by_hash(
            &self,
            hash: &str,
        ) -> MetadataResult<Option<ContentMetadata>> {
            let row = sqlx::query_as::<_, ContentMetadata>(
                "SELECT blob_id, hash, size FROM content_metadata WHERE hash = ?",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn create_content(&self, content: &ContentMetadata) -> MetadataResult<()> {
            let size = i64::try_from(content.size).map_err(|_| {
                MetadataError::InvalidInput(format!("content size {} too large", content.size))
            })?;

            sqlx::query("INSERT INTO content_metadata (blob_id, hash, size) VALUES (?, ?, ?)")
                .bind(id_text(content.blob_id))
                .bind(&content.hash)
                .bind(size)
                .execute(&self.pool)
                .await
                .map_err(|e| MetadataError::from_insert(e, || format!("content {}", content.hash)))?;
            Ok(())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Files
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    document_date TEXT NOT NULL,
    hash TEXT NOT NULL DEFAULT '',
    UNIQUE(filename, document_date)
);
CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash);
CREATE INDEX IF NOT EXISTS idx_files_document_date ON files(document_date);

-- Tag categories
CREATE TABLE IF NOT EXISTS tag_categories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

-- Tags
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    system INTEGER NOT NULL DEFAULT 0,
    category_id TEXT REFERENCES tag_categories(id) ON DELETE SET NULL
);
INSERT OR IGNORE INTO tags (id, name, system)
VALUES ('00000000-0000-0000-0000-000000000001', 'unfiled', 1);

-- File/tag associations
CREATE TABLE IF NOT EXISTS file_tags (
    file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (file_id, tag_id)
);
CREATE INDEX IF NOT EXISTS idx_file_tags_tag ON file_tags(tag_id);

-- Content descriptors, one per distinct hash
CREATE TABLE IF NOT EXISTS content_metadata (
    blob_id TEXT PRIMARY KEY,
    hash TEXT NOT NULL UNIQUE,
    size INTEGER NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentMetadata;
    use folio_core::TAG_UNFILED;
    use time::macros::date;
    use uuid::Uuid;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::new(dir.path().join("folio.db"), 4, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent_and_seeds_unfiled() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.migrate().await.unwrap();

        let tag = store.find_tag_by_name(TAG_UNFILED).await.unwrap().unwrap();
        assert!(tag.system);
        assert_eq!(tag.id.to_string(), UNFILED_TAG_ID);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = open_store(&dir).await;
            store
                .create_file("kept.pdf", date!(2020 - 01 - 02))
                .await
                .unwrap()
                .id
        };

        let store = open_store(&dir).await;
        let file = store.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.filename, "kept.pdf");
    }

    #[tokio::test]
    async fn test_zero_connections_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteStore::new(dir.path().join("x.db"), 0, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MetadataError::Config(_))));
    }

    #[tokio::test]
    async fn test_file_size_comes_from_content_join() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let file = store
            .create_file("sized.bin", date!(2021 - 06 - 30))
            .await
            .unwrap();
        assert_eq!(store.get_file(file.id).await.unwrap().unwrap().size, 0);

        let hash = "ab".repeat(32);
        store
            .create_content(&ContentMetadata {
                blob_id: Uuid::new_v4(),
                hash: hash.clone(),
                size: 1234,
            })
            .await
            .unwrap();
        store.update_file_hash(file.id, &hash).await.unwrap();

        let file = store.get_file(file.id).await.unwrap().unwrap();
        assert_eq!(file.size, 1234);
        assert!(file.has_content());
    }
}
