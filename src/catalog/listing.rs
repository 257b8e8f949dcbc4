use crate::catalog::{CatalogError, CatalogStore};
use crate::db::DbCatalogEntry;
use serde::{Deserialize, Serialize};

/// Source tag carried by every listing row
pub const PLATFORM: &str = env!("CARGO_PKG_NAME");

/// One row of the public search listing
///
/// `url` points at the playback endpoint for the entry; the frontend resolves
/// the stream through it rather than through `location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub platform: String,
    pub artist: String,
    pub album: String,
    pub artwork: String,
    pub location: String,
    pub url: String,
}

impl SearchResult {
    pub fn from_entry(entry: &DbCatalogEntry, play_base_url: &str) -> Self {
        SearchResult {
            id: entry.id.to_string(),
            title: entry.name.clone(),
            platform: PLATFORM.to_string(),
            artist: entry.singer.clone(),
            album: entry.album.clone(),
            artwork: entry.cover.clone().unwrap_or_default(),
            location: entry.location.clone(),
            url: play_url(play_base_url, entry.id),
        }
    }
}

/// `<base>?id=<id>`, tolerating a trailing `?` or `/` on the base
pub fn play_url(play_base_url: &str, id: i64) -> String {
    let base = play_base_url.trim_end_matches(['?', '/']);
    format!("{}?id={}", base, id)
}

/// Search the catalog and shape committed hits into the public listing
///
/// Entries still pending or orphaned have nothing to play and are left out.
pub async fn search_listing(
    store: &dyn CatalogStore,
    keyword: &str,
    play_base_url: &str,
) -> Result<Vec<SearchResult>, CatalogError> {
    let entries = store.search_by_keyword(keyword).await?;
    Ok(entries
        .iter()
        .filter(|entry| entry.is_committed())
        .map(|entry| SearchResult::from_entry(entry, play_base_url))
        .collect())
}
