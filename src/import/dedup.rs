use crate::catalog::{CatalogError, CatalogStore};
use crate::import::types::{IngestError, IngestionCandidate};
use std::sync::Arc;
use tracing::debug;

/// Pre-admission duplicate check against the catalog
///
/// Matches `(name, album, singer)` exactly. The check is not atomic with the
/// following reservation; two concurrent candidates with the same key can
/// both pass here, and the store's unique constraint rejects the loser.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn CatalogStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        DedupGate { store }
    }

    pub async fn exists(&self, name: &str, album: &str, singer: &str) -> Result<bool, CatalogError> {
        self.store.exists(name, album, singer).await
    }

    /// Reject the candidate with `Duplicate` if its key is already catalogued
    pub async fn admit(&self, candidate: &IngestionCandidate) -> Result<(), IngestError> {
        if self
            .exists(&candidate.name, &candidate.album, &candidate.singer)
            .await?
        {
            debug!(
                "Rejecting duplicate {} / {} / {}",
                candidate.name, candidate.album, candidate.singer
            );
            return Err(IngestError::Duplicate {
                name: candidate.name.clone(),
                album: candidate.album.clone(),
                singer: candidate.singer.clone(),
            });
        }
        Ok(())
    }
}
