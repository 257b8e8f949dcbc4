use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::time::Duration;
use tracing::info;

use crate::db::models::*;

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the catalog database and its tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!("Opening catalog database at {}", database_path);

        // WAL + busy timeout so concurrent ingestion tasks wait instead of failing on locks
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // The UNIQUE constraint makes reservation an atomic create-if-absent.
        // The *_folded columns hold lowercased copies for keyword search.
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                album TEXT NOT NULL,
                singer TEXT NOT NULL,
                name_folded TEXT NOT NULL DEFAULT '',
                album_folded TEXT NOT NULL DEFAULT '',
                singer_folded TEXT NOT NULL DEFAULT '',
                cover TEXT,
                location TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(name, album, singer)
            )
            "#,
            ENTRY_STATUS_PENDING
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_catalog_entries_location ON catalog_entries (location, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a pending entry with an empty location, returning its id
    pub async fn insert_entry(&self, entry: &NewCatalogEntry) -> Result<i64, sqlx::Error> {
        let now = timestamp(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO catalog_entries (
                name, album, singer, name_folded, album_folded, singer_folded,
                cover, location, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, '', ?, ?, ?)
            "#,
        )
        .bind(&entry.name)
        .bind(&entry.album)
        .bind(&entry.singer)
        .bind(fold(&entry.name))
        .bind(fold(&entry.album))
        .bind(fold(&entry.singer))
        .bind(&entry.cover)
        .bind(EntryStatus::Pending)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get an entry by ID
    pub async fn get_entry_by_id(&self, id: i64) -> Result<Option<DbCatalogEntry>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM catalog_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Apply a partial update, returning the number of rows touched
    pub async fn update_entry(&self, id: i64, changes: &EntryChanges) -> Result<u64, sqlx::Error> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE catalog_entries SET ");
        let mut fields = builder.separated(", ");

        if let Some(name) = &changes.name {
            fields.push("name = ").push_bind_unseparated(name.clone());
            fields.push("name_folded = ").push_bind_unseparated(fold(name));
        }
        if let Some(album) = &changes.album {
            fields.push("album = ").push_bind_unseparated(album.clone());
            fields.push("album_folded = ").push_bind_unseparated(fold(album));
        }
        if let Some(singer) = &changes.singer {
            fields.push("singer = ").push_bind_unseparated(singer.clone());
            fields.push("singer_folded = ").push_bind_unseparated(fold(singer));
        }
        if let Some(cover) = &changes.cover {
            fields.push("cover = ").push_bind_unseparated(cover.clone());
        }
        if let Some(location) = &changes.location {
            fields.push("location = ").push_bind_unseparated(location.clone());
        }
        if let Some(status) = changes.status {
            fields.push("status = ").push_bind_unseparated(status);
        }
        fields
            .push("updated_at = ")
            .push_bind_unseparated(timestamp(Utc::now()));

        builder.push(" WHERE id = ").push_bind(id);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Delete an entry, returning the number of rows removed
    pub async fn delete_entry(&self, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM catalog_entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Exact match on the (name, album, singer) key
    pub async fn entry_exists(
        &self,
        name: &str,
        album: &str,
        singer: &str,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM catalog_entries WHERE name = ? AND album = ? AND singer = ?) AS found",
        )
        .bind(name)
        .bind(album)
        .bind(singer)
        .fetch_one(&self.pool)
        .await?;

        row.try_get("found")
    }

    /// Case-insensitive substring search over name, singer and album
    ///
    /// Matches against the lowercased columns, so folding covers non-ASCII
    /// letters too. SQLite's own LIKE folds ASCII only.
    pub async fn search_entries(&self, keyword: &str) -> Result<Vec<DbCatalogEntry>, sqlx::Error> {
        let pattern = format!("%{}%", escape_like(&fold(keyword)));

        let rows = sqlx::query(
            r#"
            SELECT * FROM catalog_entries
            WHERE name_folded LIKE ?1 ESCAPE '\'
               OR singer_folded LIKE ?1 ESCAPE '\'
               OR album_folded LIKE ?1 ESCAPE '\'
            ORDER BY id
            "#,
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Entries still missing a location that were created before `older_than`
    pub async fn get_unfinished_entries(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<DbCatalogEntry>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM catalog_entries WHERE location = '' AND created_at < ? ORDER BY id",
        )
        .bind(timestamp(older_than))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

/// Fixed-width RFC 3339 so that text comparison orders by time
fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

fn entry_from_row(row: &SqliteRow) -> Result<DbCatalogEntry, sqlx::Error> {
    Ok(DbCatalogEntry {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        album: row.try_get("album")?,
        singer: row.try_get("singer")?,
        cover: row.try_get("cover")?,
        location: row.try_get("location")?,
        status: row.try_get("status")?,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

fn fold(text: &str) -> String {
    text.to_lowercase()
}

/// Escape LIKE wildcards so the keyword matches literally
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_database() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("catalog.db");
        let database = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (database, temp_dir)
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("song"), "song");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b\\c"), "a\\_b\\\\c");
    }

    #[tokio::test]
    async fn test_insert_starts_pending_with_empty_location() {
        let (db, _temp_dir) = open_database().await;

        let id = db
            .insert_entry(&NewCatalogEntry::new("Song", "AlbumX", "Singer"))
            .await
            .unwrap();
        let entry = db.get_entry_by_id(id).await.unwrap().unwrap();

        assert_eq!(entry.id, id);
        assert_eq!(entry.location, "");
        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(!entry.is_committed());
    }

    #[tokio::test]
    async fn test_unique_key_rejected_by_store() {
        let (db, _temp_dir) = open_database().await;
        let entry = NewCatalogEntry::new("Song", "AlbumX", "Singer");

        db.insert_entry(&entry).await.unwrap();
        let err = db.insert_entry(&entry).await.unwrap_err();

        let is_unique = err
            .as_database_error()
            .map(|e| e.is_unique_violation())
            .unwrap_or(false);
        assert!(is_unique, "expected unique violation, got {:?}", err);
    }

    #[tokio::test]
    async fn test_partial_update_leaves_other_columns() {
        let (db, _temp_dir) = open_database().await;
        let id = db
            .insert_entry(&NewCatalogEntry::new("Song", "AlbumX", "Singer"))
            .await
            .unwrap();

        let touched = db
            .update_entry(id, &EntryChanges::commit("s3://music/tracks/1"))
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let entry = db.get_entry_by_id(id).await.unwrap().unwrap();
        assert_eq!(entry.name, "Song");
        assert_eq!(entry.location, "s3://music/tracks/1");
        assert_eq!(entry.status, EntryStatus::Committed);
        assert!(entry.updated_at >= entry.created_at);
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let (db, _temp_dir) = open_database().await;
        db.insert_entry(&NewCatalogEntry::new("100% Love", "A", "S"))
            .await
            .unwrap();
        db.insert_entry(&NewCatalogEntry::new("1000 Loves", "A", "S"))
            .await
            .unwrap();

        let found = db.search_entries("100%").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "100% Love");
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let (db, _temp_dir) = open_database().await;
        let id = db
            .insert_entry(&NewCatalogEntry::new("Song", "A", "S"))
            .await
            .unwrap();
        db.update_entry(
            id,
            &EntryChanges {
                name: Some("Über Alles".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let found = db.search_entries("ÜBER").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Über Alles");
        assert!(db.search_entries("song").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unfinished_entries_respect_cutoff() {
        let (db, _temp_dir) = open_database().await;
        let pending = db
            .insert_entry(&NewCatalogEntry::new("Pending", "A", "S"))
            .await
            .unwrap();
        let done = db
            .insert_entry(&NewCatalogEntry::new("Done", "A", "S"))
            .await
            .unwrap();
        db.update_entry(done, &EntryChanges::commit("loc"))
            .await
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let unfinished = db.get_unfinished_entries(cutoff).await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, pending);

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(db.get_unfinished_entries(past).await.unwrap().is_empty());
    }
}
