use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;

// String constants for SQL DEFAULT clauses (keep in sync with as_str())
pub(crate) const ENTRY_STATUS_PENDING: &str = "pending";
const ENTRY_STATUS_COMMITTED: &str = "committed";
const ENTRY_STATUS_ORPHANED: &str = "orphaned";

/// Lifecycle state of a catalog entry
///
/// An entry is created `Pending` with an empty location, becomes `Committed`
/// once its content is uploaded and the location attached, and is moved to
/// `Orphaned` when the upload or commit step gave up and the record was kept
/// for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,   // Reserved, content not yet uploaded
    Committed, // Location attached
    Orphaned,  // Upload or commit failed, kept for reconciliation
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => ENTRY_STATUS_PENDING,
            EntryStatus::Committed => ENTRY_STATUS_COMMITTED,
            EntryStatus::Orphaned => ENTRY_STATUS_ORPHANED,
        }
    }
}

/// One ingested media item
///
/// `(name, album, singer)` is unique across the catalog. `location` stays
/// empty until the content has been uploaded to blob storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbCatalogEntry {
    pub id: i64,
    /// Track title
    pub name: String,
    pub album: String,
    /// Performer
    pub singer: String,
    /// Artwork reference, if any
    pub cover: Option<String>,
    /// Remote blob address, empty while pending
    pub location: String,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbCatalogEntry {
    /// True once the blob location has been attached
    pub fn is_committed(&self) -> bool {
        !self.location.is_empty()
    }
}

/// Fields supplied when reserving a new entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCatalogEntry {
    pub name: String,
    pub album: String,
    pub singer: String,
    pub cover: Option<String>,
}

impl NewCatalogEntry {
    pub fn new(name: &str, album: &str, singer: &str) -> Self {
        NewCatalogEntry {
            name: name.to_string(),
            album: album.to_string(),
            singer: singer.to_string(),
            cover: None,
        }
    }
}

/// Partial update of a catalog entry; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryChanges {
    pub name: Option<String>,
    pub album: Option<String>,
    pub singer: Option<String>,
    pub cover: Option<String>,
    pub location: Option<String>,
    pub status: Option<EntryStatus>,
}

impl EntryChanges {
    /// Attach the uploaded location and mark the entry committed
    pub fn commit(location: &str) -> Self {
        EntryChanges {
            location: Some(location.to_string()),
            status: Some(EntryStatus::Committed),
            ..Default::default()
        }
    }

    pub fn status(status: EntryStatus) -> Self {
        EntryChanges {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &EntryChanges::default()
    }
}
