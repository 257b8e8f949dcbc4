use crate::catalog::CatalogError;
use crate::cloud_storage::CloudStorageError;
use crate::db::{DbCatalogEntry, NewCatalogEntry};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A track derived from one source file, not yet persisted
///
/// Produced by the scanner and consumed exactly once by the ingest service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionCandidate {
    pub source_path: PathBuf,
    pub name: String,
    pub album: String,
    pub singer: String,
}

impl IngestionCandidate {
    pub fn to_new_entry(&self) -> NewCatalogEntry {
        NewCatalogEntry::new(&self.name, &self.album, &self.singer)
    }
}

/// Per-path problems found while walking the source tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Failed to read file {path:?}: {reason}")]
    File { path: PathBuf, reason: String },
    #[error("Failed to read directory {path:?}: {reason}")]
    Directory { path: PathBuf, reason: String },
}

/// Step of the ingest protocol at which a candidate stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    /// Dedup check before anything is written
    Admission,
    /// Creating the pending catalog entry
    Reserve,
    /// Uploading content to blob storage
    Transfer,
    /// Attaching the uploaded location to the entry
    Commit,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            IngestStage::Admission => "admission",
            IngestStage::Reserve => "reserve",
            IngestStage::Transfer => "transfer",
            IngestStage::Commit => "commit",
        };
        f.write_str(stage)
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Already in catalog: {name} / {album} / {singer}")]
    Duplicate {
        name: String,
        album: String,
        singer: String,
    },
    #[error("Persistence error: {0}")]
    Persistence(#[from] CatalogError),
    #[error("Upload error: {0}")]
    Upload(#[from] CloudStorageError),
    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),
    #[error("Ingest task failed: {0}")]
    Task(String),
}

impl IngestError {
    /// Map a reservation failure, folding the store's unique-key conflict into `Duplicate`
    pub(crate) fn from_reserve(error: CatalogError) -> Self {
        match error {
            CatalogError::Duplicate {
                name,
                album,
                singer,
            } => IngestError::Duplicate {
                name,
                album,
                singer,
            },
            other => IngestError::Persistence(other),
        }
    }

    /// Whether another attempt at the same step could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Timeout(_) => true,
            IngestError::Upload(CloudStorageError::SdkError(_)) => true,
            IngestError::Upload(CloudStorageError::Io(e)) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            IngestError::Persistence(CatalogError::Database(_)) => true,
            _ => false,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestError::Duplicate { .. })
    }
}

/// A candidate that did not reach committed state
#[derive(Debug)]
pub struct IngestFailure {
    pub candidate: IngestionCandidate,
    pub stage: IngestStage,
    /// Set once a catalog entry was reserved (the entry may be orphaned)
    pub entry_id: Option<i64>,
    pub error: IngestError,
}

impl fmt::Display for IngestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} / {} / {})",
            self.stage,
            self.candidate.source_path.display(),
            self.candidate.name,
            self.candidate.album,
            self.candidate.singer
        )?;
        if let Some(id) = self.entry_id {
            write!(f, " entry {}", id)?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Result of ingesting one candidate
#[derive(Debug)]
pub enum IngestionOutcome {
    Committed(DbCatalogEntry),
    Failed(IngestFailure),
}

impl IngestionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, IngestionOutcome::Committed(_))
    }
}

/// Tally of a pipeline run
#[derive(Debug)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub succeeded: usize,
    pub failures: Vec<IngestFailure>,
    pub scan_errors: Vec<ScanError>,
    /// Candidates pulled from the scan but never dispatched because the run was cancelled
    pub skipped: usize,
    pub cancelled: bool,
}

impl IngestReport {
    pub fn new(run_id: Uuid) -> Self {
        IngestReport {
            run_id,
            succeeded: 0,
            failures: Vec::new(),
            scan_errors: Vec::new(),
            skipped: 0,
            cancelled: false,
        }
    }

    pub fn record(&mut self, outcome: IngestionOutcome) {
        match outcome {
            IngestionOutcome::Committed(_) => self.succeeded += 1,
            IngestionOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    pub fn duplicates(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.error.is_duplicate())
            .count()
    }

    /// Entry ids this run reserved but never committed
    ///
    /// Under `CompensationPolicy::MarkOrphaned` these rows are still in the
    /// catalog as orphans. Under `Delete` they have already been removed.
    pub fn reserved_ids(&self) -> Vec<i64> {
        self.failures.iter().filter_map(|f| f.entry_id).collect()
    }
}

/// Progress updates for an embedding UI, one stream per ingest service
#[derive(Debug, Clone, PartialEq)]
pub enum IngestProgress {
    Started {
        path: PathBuf,
    },
    Committed {
        path: PathBuf,
        id: i64,
        location: String,
    },
    Failed {
        path: PathBuf,
        stage: IngestStage,
        entry_id: Option<i64>,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> IngestionCandidate {
        IngestionCandidate {
            source_path: PathBuf::from("/music/AlbumX/Singer - Song.mp3"),
            name: "Song".to_string(),
            album: "AlbumX".to_string(),
            singer: "Singer".to_string(),
        }
    }

    #[test]
    fn test_failure_display_names_stage_and_entry() {
        let failure = IngestFailure {
            candidate: candidate(),
            stage: IngestStage::Transfer,
            entry_id: Some(12),
            error: IngestError::Timeout(Duration::from_secs(5)),
        };

        let text = failure.to_string();
        assert!(text.starts_with("[transfer] /music/AlbumX/Singer - Song.mp3"));
        assert!(text.contains("Song / AlbumX / Singer"));
        assert!(text.contains("entry 12"));
    }

    #[test]
    fn test_reserve_conflict_becomes_duplicate() {
        let error = IngestError::from_reserve(CatalogError::Duplicate {
            name: "Song".to_string(),
            album: "AlbumX".to_string(),
            singer: "Singer".to_string(),
        });
        assert!(error.is_duplicate());

        let error = IngestError::from_reserve(CatalogError::NotFound(1));
        assert!(matches!(error, IngestError::Persistence(_)));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(IngestError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(IngestError::Upload(CloudStorageError::SdkError("503".to_string())).is_retryable());
        assert!(!IngestError::Upload(CloudStorageError::Io(std::io::Error::from(
            std::io::ErrorKind::NotFound
        )))
        .is_retryable());
        assert!(!IngestError::Duplicate {
            name: String::new(),
            album: String::new(),
            singer: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn test_report_tally() {
        let mut report = IngestReport::new(Uuid::new_v4());
        report.record(IngestionOutcome::Failed(IngestFailure {
            candidate: candidate(),
            stage: IngestStage::Admission,
            entry_id: None,
            error: IngestError::Duplicate {
                name: "Song".to_string(),
                album: "AlbumX".to_string(),
                singer: "Singer".to_string(),
            },
        }));
        report.record(IngestionOutcome::Failed(IngestFailure {
            candidate: candidate(),
            stage: IngestStage::Transfer,
            entry_id: Some(4),
            error: IngestError::Task("boom".to_string()),
        }));

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.duplicates(), 1);
        assert_eq!(report.reserved_ids(), vec![4]);
    }
}
