use crate::catalog::{CatalogError, CatalogStore};
use crate::cloud_storage::{BlobReader, CloudStorageManager};
use crate::db::{Database, DbCatalogEntry, EntryChanges, NewCatalogEntry};
use chrono::{DateTime, Utc};
use tracing::debug;

/// The main catalog manager for database operations and content lookup
///
/// Handles:
/// - Entry persistence (reserve, partial update, delete)
/// - Keyword search and reconciliation queries
/// - Resolving committed entries to their blob content
#[derive(Debug, Clone)]
pub struct CatalogManager {
    database: Database,
    cloud_storage: CloudStorageManager,
}

impl CatalogManager {
    pub fn new(database: Database, cloud_storage: CloudStorageManager) -> Self {
        CatalogManager {
            database,
            cloud_storage,
        }
    }

    /// Open the uploaded content of a committed entry
    ///
    /// Pending and orphaned entries have nothing to stream and fail with
    /// `NotCommitted`.
    pub async fn open_stream(&self, id: i64) -> Result<BlobReader, CatalogError> {
        let entry = self.get_by_id(id).await?;
        if !entry.is_committed() {
            return Err(CatalogError::NotCommitted(id));
        }

        let reader = self.cloud_storage.download_stream(&id.to_string()).await?;
        Ok(reader)
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl CatalogStore for CatalogManager {
    async fn create(&self, entry: &NewCatalogEntry) -> Result<i64, CatalogError> {
        match self.database.insert_entry(entry).await {
            Ok(id) => {
                debug!(id, name = %entry.name, "Reserved catalog entry");
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(CatalogError::Duplicate {
                name: entry.name.clone(),
                album: entry.album.clone(),
                singer: entry.singer.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<DbCatalogEntry, CatalogError> {
        self.database
            .get_entry_by_id(id)
            .await?
            .ok_or(CatalogError::NotFound(id))
    }

    async fn update(&self, id: i64, changes: &EntryChanges) -> Result<(), CatalogError> {
        if changes.is_empty() {
            self.get_by_id(id).await?;
            return Ok(());
        }

        let touched = self.database.update_entry(id, changes).await?;
        if touched == 0 {
            return Err(CatalogError::NotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), CatalogError> {
        let removed = self.database.delete_entry(id).await?;
        if removed == 0 {
            return Err(CatalogError::NotFound(id));
        }
        Ok(())
    }

    async fn search_by_keyword(&self, keyword: &str) -> Result<Vec<DbCatalogEntry>, CatalogError> {
        Ok(self.database.search_entries(keyword).await?)
    }

    async fn exists(&self, name: &str, album: &str, singer: &str) -> Result<bool, CatalogError> {
        Ok(self.database.entry_exists(name, album, singer).await?)
    }

    async fn find_unfinished(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<DbCatalogEntry>, CatalogError> {
        Ok(self.database.get_unfinished_entries(older_than).await?)
    }
}
