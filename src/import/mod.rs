// # Import Module
//
// Folder-to-catalog ingestion with focused, testable components:
//
// - **FolderScanner**: Walks a source tree and derives candidates from the layout
// - **DedupGate**: Rejects candidates already present in the catalog
// - **UploadLimiter**: Bounds how many candidates upload at once
// - **RetryPolicy**: Backoff for transient transfer and commit failures
// - **IngestService**: Runs reserve → transfer → commit per candidate
//
// Public API:
// - `IngestService::run`: Ingest a whole scan and return an `IngestReport`
// - `IngestService::ingest`: Ingest a single candidate
// - `IngestProgress`: Per-candidate progress updates

mod dedup;
mod folder_scanner;
mod limiter;
mod retry_policy;
mod service;
mod types;

pub use dedup::DedupGate;
pub use folder_scanner::{is_audio_file, strip_performer_prefix, FolderScanner};
pub use limiter::{UploadLimiter, UploadSlot};
pub use retry_policy::RetryPolicy;
pub use service::{CompensationPolicy, IngestConfig, IngestService};
pub use types::{
    IngestError, IngestFailure, IngestProgress, IngestReport, IngestStage, IngestionCandidate,
    IngestionOutcome, ScanError,
};
