// # Catalog
//
// Persisted metadata records for ingested tracks:
//
// - **CatalogStore**: the narrow async contract the ingestion pipeline talks to
// - **CatalogManager**: SQLite-backed implementation on top of `db::Database`
// - **listing**: public search-result shape consumed by the playback/search frontend

mod listing;
mod manager;

pub use listing::{search_listing, SearchResult, PLATFORM};
pub use manager::CatalogManager;

use crate::cloud_storage::CloudStorageError;
use crate::db::{DbCatalogEntry, EntryChanges, NewCatalogEntry};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Catalog entry {0} not found")]
    NotFound(i64),
    #[error("Catalog entry already exists: {name} / {album} / {singer}")]
    Duplicate {
        name: String,
        album: String,
        singer: String,
    },
    #[error("Catalog entry {0} has no uploaded content")]
    NotCommitted(i64),
    #[error("Cloud storage error: {0}")]
    CloudStorage(#[from] CloudStorageError),
}

/// Metadata store contract used by the ingestion pipeline
///
/// Implementations must tolerate concurrent calls from many ingestion tasks.
/// `create` is an atomic create-if-absent on `(name, album, singer)` and
/// reports a conflict as [`CatalogError::Duplicate`].
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Reserve a new entry with an empty location, returning its id
    async fn create(&self, entry: &NewCatalogEntry) -> Result<i64, CatalogError>;

    async fn get_by_id(&self, id: i64) -> Result<DbCatalogEntry, CatalogError>;

    /// Partial update; fails with `NotFound` when no entry has this id
    async fn update(&self, id: i64, changes: &EntryChanges) -> Result<(), CatalogError>;

    async fn delete(&self, id: i64) -> Result<(), CatalogError>;

    /// Case-insensitive substring match on name, singer or album
    async fn search_by_keyword(&self, keyword: &str) -> Result<Vec<DbCatalogEntry>, CatalogError>;

    /// Exact match on all three key fields
    async fn exists(&self, name: &str, album: &str, singer: &str) -> Result<bool, CatalogError>;

    /// Entries with an empty location created before `older_than`
    async fn find_unfinished(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<DbCatalogEntry>, CatalogError>;
}
