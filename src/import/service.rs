// # Ingest Service - Orchestrator
//
// Runs the per-candidate protocol and drives a whole scan through it:
//
// 1. Admission: DedupGate rejects keys already in the catalog
// 2. Reserve:   CatalogStore::create inserts a pending entry (empty location)
// 3. Transfer:  CloudStorage uploads the file under the entry id, with timeout + retries
// 4. Commit:    CatalogStore::update attaches the location, with retries
//
// A failure after Reserve leaves an entry without content. It is never hidden:
// the failure carries the entry id, and the configured CompensationPolicy either
// marks the entry orphaned for later reconciliation or deletes it.
//
// `run` spawns one task per candidate, bounded by the UploadLimiter. Tasks are
// isolated: one candidate failing never cancels or blocks another.

use crate::catalog::CatalogStore;
use crate::cloud_storage::CloudStorageManager;
use crate::db::{DbCatalogEntry, EntryChanges, EntryStatus};
use crate::import::dedup::DedupGate;
use crate::import::limiter::UploadLimiter;
use crate::import::retry_policy::RetryPolicy;
use crate::import::types::{
    IngestError, IngestFailure, IngestProgress, IngestReport, IngestStage, IngestionCandidate,
    IngestionOutcome, ScanError,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What to do with a reserved entry whose transfer or commit gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationPolicy {
    /// Keep the entry with status `orphaned` for reconciliation
    MarkOrphaned,
    /// Delete the entry; an already uploaded blob is left in storage
    Delete,
}

impl FromStr for CompensationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mark" | "mark_orphaned" | "orphan" => Ok(CompensationPolicy::MarkOrphaned),
            "delete" => Ok(CompensationPolicy::Delete),
            other => Err(format!("Unknown compensation policy: {}", other)),
        }
    }
}

/// Tuning for the ingest service
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Number of candidates uploading at once
    pub max_upload_workers: usize,
    /// Deadline for a single upload attempt
    pub upload_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub compensation: CompensationPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            max_upload_workers: 3,
            upload_timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
            compensation: CompensationPolicy::MarkOrphaned,
        }
    }
}

/// Failure inside the protocol, before it is tied to its candidate
struct StageError {
    stage: IngestStage,
    entry_id: Option<i64>,
    error: IngestError,
}

impl StageError {
    fn new(stage: IngestStage, entry_id: Option<i64>, error: IngestError) -> Self {
        StageError {
            stage,
            entry_id,
            error,
        }
    }
}

/// Ingest orchestrator; cheap to clone, one clone per spawned task
#[derive(Clone)]
pub struct IngestService {
    catalog: Arc<dyn CatalogStore>,
    cloud_storage: CloudStorageManager,
    dedup_gate: DedupGate,
    limiter: UploadLimiter,
    config: Arc<IngestConfig>,
    progress_tx: Option<mpsc::UnboundedSender<IngestProgress>>,
}

impl IngestService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        cloud_storage: CloudStorageManager,
        config: IngestConfig,
    ) -> Self {
        IngestService {
            dedup_gate: DedupGate::new(catalog.clone()),
            limiter: UploadLimiter::new(config.max_upload_workers),
            catalog,
            cloud_storage,
            config: Arc::new(config),
            progress_tx: None,
        }
    }

    /// Send per-candidate progress events to `progress_tx`
    pub fn with_progress(mut self, progress_tx: mpsc::UnboundedSender<IngestProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    pub fn limiter(&self) -> &UploadLimiter {
        &self.limiter
    }

    fn emit(&self, progress: IngestProgress) {
        if let Some(tx) = &self.progress_tx {
            // Subscriber may be gone; ingestion carries on regardless
            let _ = tx.send(progress);
        }
    }

    /// Ingest a single candidate through the full protocol
    ///
    /// Does not take an upload slot itself; `run` does that before spawning.
    pub async fn ingest(&self, candidate: IngestionCandidate) -> IngestionOutcome {
        info!(
            path = %candidate.source_path.display(),
            name = %candidate.name,
            album = %candidate.album,
            singer = %candidate.singer,
            "Ingest started"
        );
        self.emit(IngestProgress::Started {
            path: candidate.source_path.clone(),
        });

        match self.run_protocol(&candidate).await {
            Ok(entry) => {
                info!(
                    path = %candidate.source_path.display(),
                    id = entry.id,
                    location = %entry.location,
                    "Ingest committed"
                );
                self.emit(IngestProgress::Committed {
                    path: candidate.source_path.clone(),
                    id: entry.id,
                    location: entry.location.clone(),
                });
                IngestionOutcome::Committed(entry)
            }
            Err(StageError {
                stage,
                entry_id,
                error,
            }) => {
                if error.is_duplicate() {
                    info!(
                        path = %candidate.source_path.display(),
                        %stage,
                        "Ingest skipped: {}", error
                    );
                } else {
                    error!(
                        path = %candidate.source_path.display(),
                        %stage,
                        entry_id = ?entry_id,
                        "Ingest failed: {}", error
                    );
                }
                self.emit(IngestProgress::Failed {
                    path: candidate.source_path.clone(),
                    stage,
                    entry_id,
                    error: error.to_string(),
                });
                IngestionOutcome::Failed(IngestFailure {
                    candidate,
                    stage,
                    entry_id,
                    error,
                })
            }
        }
    }

    async fn run_protocol(
        &self,
        candidate: &IngestionCandidate,
    ) -> Result<DbCatalogEntry, StageError> {
        // 1. Admission
        self.dedup_gate
            .admit(candidate)
            .await
            .map_err(|e| StageError::new(IngestStage::Admission, None, e))?;

        // 2. Reserve
        let id = self
            .catalog
            .create(&candidate.to_new_entry())
            .await
            .map_err(|e| StageError::new(IngestStage::Reserve, None, IngestError::from_reserve(e)))?;

        // 3. Transfer
        let location = match self.transfer(id, &candidate.source_path).await {
            Ok(location) => location,
            Err(e) => {
                self.compensate(id, IngestStage::Transfer).await;
                return Err(StageError::new(IngestStage::Transfer, Some(id), e));
            }
        };

        // 4. Commit
        if let Err(e) = self.commit(id, &location).await {
            self.compensate(id, IngestStage::Commit).await;
            return Err(StageError::new(IngestStage::Commit, Some(id), e));
        }

        self.catalog
            .get_by_id(id)
            .await
            .map_err(|e| StageError::new(IngestStage::Commit, Some(id), e.into()))
    }

    async fn transfer(&self, id: i64, source_path: &Path) -> Result<String, IngestError> {
        let key = id.to_string();
        let key = key.as_str();
        let upload_timeout = self.config.upload_timeout;
        let cloud_storage = &self.cloud_storage;

        self.with_retries(id, IngestStage::Transfer, move || async move {
            match tokio::time::timeout(upload_timeout, cloud_storage.upload_file(key, source_path))
                .await
            {
                Ok(result) => result.map_err(IngestError::from),
                Err(_) => Err(IngestError::Timeout(upload_timeout)),
            }
        })
        .await
    }

    async fn commit(&self, id: i64, location: &str) -> Result<(), IngestError> {
        let changes = EntryChanges::commit(location);
        let changes = &changes;
        let catalog = &self.catalog;

        self.with_retries(id, IngestStage::Commit, move || async move {
            catalog.update(id, changes).await.map_err(IngestError::from)
        })
        .await
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the budget runs out
    async fn with_retries<T, F, Fut>(
        &self,
        id: i64,
        stage: IngestStage,
        mut op: F,
    ) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let policy = &self.config.retry_policy;
        let mut retry_count = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if policy.should_retry(&e, retry_count) => {
                    let backoff = policy.backoff(retry_count);
                    warn!(
                        entry_id = id,
                        %stage,
                        attempt = retry_count + 1,
                        ?backoff,
                        "Retrying after error: {}", e
                    );
                    tokio::time::sleep(backoff).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve a reserved entry that could not be committed
    async fn compensate(&self, id: i64, stage: IngestStage) {
        let result = match self.config.compensation {
            CompensationPolicy::MarkOrphaned => {
                self.catalog
                    .update(id, &EntryChanges::status(EntryStatus::Orphaned))
                    .await
            }
            CompensationPolicy::Delete => self.catalog.delete(id).await,
        };

        match result {
            Ok(()) => warn!(
                entry_id = id,
                %stage,
                policy = ?self.config.compensation,
                "Compensated uncommitted entry"
            ),
            Err(e) => error!(
                entry_id = id,
                %stage,
                "Compensation failed, entry left pending: {}", e
            ),
        }
    }

    /// Ingest every candidate, at most `max_upload_workers` at a time
    ///
    /// Scan errors are collected into the report. Once `cancel` fires no further
    /// candidates are dispatched and the remainder of the scan is counted as
    /// skipped; tasks already running finish their protocol.
    /// Returns after every dispatched task has completed.
    pub async fn run<I>(&self, candidates: I, cancel: CancellationToken) -> IngestReport
    where
        I: IntoIterator<Item = Result<IngestionCandidate, ScanError>>,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id);

        self.dispatch_all(run_id, candidates, cancel)
            .instrument(span)
            .await
    }

    async fn dispatch_all<I>(
        &self,
        run_id: Uuid,
        candidates: I,
        cancel: CancellationToken,
    ) -> IngestReport
    where
        I: IntoIterator<Item = Result<IngestionCandidate, ScanError>>,
    {
        let mut report = IngestReport::new(run_id);
        let mut tasks = JoinSet::new();
        // Lets a panicked task still be reported against its candidate
        let mut in_flight = HashMap::new();

        info!(workers = self.limiter.capacity(), "Ingest run started");

        let mut candidates = candidates.into_iter();
        for item in candidates.by_ref() {
            let candidate = match item {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    report.scan_errors.push(e);
                    continue;
                }
            };

            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                slot = self.limiter.acquire() => slot.ok(),
            };
            let Some(slot) = slot else {
                report.cancelled = true;
                report.skipped += 1;
                break;
            };

            let service = self.clone();
            let task_candidate = candidate.clone();
            let handle = tasks.spawn(
                async move {
                    let _slot = slot;
                    service.ingest(task_candidate).await
                }
                .in_current_span(),
            );
            in_flight.insert(handle.id(), candidate);
        }

        if report.cancelled {
            // Account for the rest of the scan without dispatching it
            for item in candidates {
                match item {
                    Ok(_) => report.skipped += 1,
                    Err(e) => report.scan_errors.push(e),
                }
            }
            warn!(
                skipped = report.skipped,
                "Ingest run cancelled, waiting for in-flight candidates"
            );
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task_id, outcome)) => {
                    in_flight.remove(&task_id);
                    report.record(outcome);
                }
                Err(join_error) => {
                    let Some(candidate) = in_flight.remove(&join_error.id()) else {
                        continue;
                    };
                    error!(
                        path = %candidate.source_path.display(),
                        "Ingest task panicked: {}", join_error
                    );
                    report.failures.push(IngestFailure {
                        candidate,
                        stage: IngestStage::Transfer,
                        entry_id: None,
                        error: IngestError::Task(join_error.to_string()),
                    });
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failures.len(),
            duplicates = report.duplicates(),
            scan_errors = report.scan_errors.len(),
            skipped = report.skipped,
            "Ingest run finished"
        );

        report
    }
}
