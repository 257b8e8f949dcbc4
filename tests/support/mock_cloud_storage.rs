use music_ingest::cloud_storage::{BlobReader, CloudStorage, CloudStorageError};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock cloud storage for testing
///
/// Keeps uploaded blobs in memory and records how uploads behaved:
/// - concurrent uploads, with the peak ever observed
/// - attempts per source file name
///
/// Failures are injected by source file name since keys (entry ids) are only
/// known once an entry has been reserved.
#[derive(Default)]
pub struct MockCloudStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    attempts: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    transient: Mutex<HashMap<String, usize>>,
    latency: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl MockCloudStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload sleeps this long while counted as in flight
    pub fn with_latency(latency: Duration) -> Self {
        MockCloudStorage {
            latency,
            ..Self::default()
        }
    }

    /// Uploads of `file_name` always fail with a non-retryable error
    pub fn fail_uploads_of(&self, file_name: &str) {
        self.failing.lock().unwrap().insert(file_name.to_string());
    }

    /// The first `times` uploads of `file_name` fail with a retryable error
    pub fn fail_transiently(&self, file_name: &str, times: usize) {
        self.transient
            .lock()
            .unwrap()
            .insert(file_name.to_string(), times);
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn attempts(&self, file_name: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    fn injected_failure(&self, file_name: &str) -> Option<CloudStorageError> {
        if self.failing.lock().unwrap().contains(file_name) {
            return Some(CloudStorageError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "injected upload failure",
            )));
        }

        let mut transient = self.transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(file_name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(CloudStorageError::SdkError(
                    "injected transient failure".to_string(),
                ));
            }
        }
        None
    }
}

/// Decrements the in-flight gauge even if the upload future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl CloudStorage for MockCloudStorage {
    async fn upload_file(&self, key: &str, file_path: &Path) -> Result<String, CloudStorageError> {
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(file_name.clone())
            .or_default() += 1;

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.current);
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = self.injected_failure(&file_name) {
            return Err(error);
        }

        let data = tokio::fs::read(file_path).await?;
        self.blobs.lock().unwrap().insert(key.to_string(), data);

        Ok(format!("mock://tracks/{}", key))
    }

    async fn download_stream(&self, key: &str) -> Result<BlobReader, CloudStorageError> {
        let data = self
            .blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| CloudStorageError::Download(format!("Blob not found: {}", key)))?;

        Ok(Box::pin(io::Cursor::new(data)))
    }
}
