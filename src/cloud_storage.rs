use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, primitives::ByteStreamError, Client};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CloudStorageError {
    #[error("S3 SDK error: {0}")]
    SdkError(String),
    #[error("ByteStream error: {0}")]
    ByteStream(#[from] ByteStreamError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Download error: {0}")]
    Download(String),
}

/// Streamed blob content returned by [`CloudStorage::download_stream`]
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// S3 configuration for cloud storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>, // For MinIO/S3-compatible services
}

impl S3Config {
    pub fn validate(&self) -> Result<(), CloudStorageError> {
        if self.bucket_name.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Region cannot be empty".to_string(),
            ));
        }
        if self.access_key_id.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Access key ID cannot be empty".to_string(),
            ));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Secret access key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Object key for a catalog entry's content, shared by all backends.
fn object_key(key: &str) -> String {
    format!("tracks/{}", key)
}

/// Trait for blob storage operations (allows mocking for tests)
///
/// `key` is chosen by the caller and must address the content for later
/// retrieval. Every failure comes back as a `CloudStorageError`.
#[async_trait::async_trait]
pub trait CloudStorage: Send + Sync {
    /// Upload a local file, returning its opaque location string
    async fn upload_file(&self, key: &str, file_path: &Path) -> Result<String, CloudStorageError>;
    /// Open a byte stream over previously uploaded content
    async fn download_stream(&self, key: &str) -> Result<BlobReader, CloudStorageError>;
}

/// Production S3 cloud storage implementation
pub struct S3CloudStorage {
    client: Client,
    bucket_name: String,
}

impl S3CloudStorage {
    /// Create a new S3 cloud storage client
    pub async fn new(config: S3Config) -> Result<Self, CloudStorageError> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None, // session_token
            None, // expiration
            "music-ingest-s3-config",
        );

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);

        // Set custom endpoint if provided (for S3-compatible services)
        if let Some(endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let client = Client::new(&aws_config);

        Ok(S3CloudStorage {
            client,
            bucket_name: config.bucket_name,
        })
    }
}

#[async_trait::async_trait]
impl CloudStorage for S3CloudStorage {
    async fn upload_file(&self, key: &str, file_path: &Path) -> Result<String, CloudStorageError> {
        let object_key = object_key(key);

        debug!(key, path = %file_path.display(), "S3CloudStorage: uploading");

        // Streams from disk instead of buffering the whole track
        let body = ByteStream::from_path(file_path).await?;

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&object_key)
            .body(body)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| CloudStorageError::SdkError(format!("Put object failed: {}", e)))?;

        let location = format!("s3://{}/{}", self.bucket_name, object_key);
        info!(key, %location, "S3CloudStorage: upload complete");

        Ok(location)
    }

    async fn download_stream(&self, key: &str) -> Result<BlobReader, CloudStorageError> {
        let object_key = object_key(key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| CloudStorageError::SdkError(format!("Get object failed: {}", e)))?;

        Ok(Box::pin(response.body.into_async_read()))
    }
}

/// Filesystem-backed storage for dev mode
///
/// Mirrors the S3 key layout under `root` and reports `file://` locations.
pub struct LocalCloudStorage {
    root: PathBuf,
}

impl LocalCloudStorage {
    pub async fn new(root: PathBuf) -> Result<Self, CloudStorageError> {
        fs::create_dir_all(root.join("tracks")).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(LocalCloudStorage { root })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(object_key(key))
    }
}

#[async_trait::async_trait]
impl CloudStorage for LocalCloudStorage {
    async fn upload_file(&self, key: &str, file_path: &Path) -> Result<String, CloudStorageError> {
        let destination = self.blob_path(key);
        let bytes = fs::copy(file_path, &destination).await?;

        debug!(key, bytes, "LocalCloudStorage: stored {}", destination.display());
        Ok(format!("file://{}", destination.display()))
    }

    async fn download_stream(&self, key: &str) -> Result<BlobReader, CloudStorageError> {
        let path = self.blob_path(key);
        let file = fs::File::open(&path).await.map_err(|e| {
            CloudStorageError::Download(format!("Blob not found at {}: {}", path.display(), e))
        })?;
        Ok(Box::pin(file))
    }
}

/// Cloneable handle over whichever storage backend is configured
#[derive(Clone)]
pub struct CloudStorageManager {
    storage: Arc<dyn CloudStorage>,
}

impl std::fmt::Debug for CloudStorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudStorageManager")
            .field("storage", &"<dyn CloudStorage>")
            .finish()
    }
}

impl CloudStorageManager {
    /// Create a new cloud storage manager with S3 configuration
    pub async fn new(config: S3Config) -> Result<Self, CloudStorageError> {
        let storage = S3CloudStorage::new(config).await?;
        Ok(Self::from_storage(Arc::new(storage)))
    }

    /// Create a manager storing blobs in a local directory
    pub async fn local(root: PathBuf) -> Result<Self, CloudStorageError> {
        let storage = LocalCloudStorage::new(root).await?;
        Ok(Self::from_storage(Arc::new(storage)))
    }

    /// Wrap an existing storage implementation (used by tests with mocks)
    pub fn from_storage(storage: Arc<dyn CloudStorage>) -> Self {
        CloudStorageManager { storage }
    }

    /// Upload a file under `key`
    pub async fn upload_file(&self, key: &str, file_path: &Path) -> Result<String, CloudStorageError> {
        self.storage.upload_file(key, file_path).await
    }

    /// Open a stream over the content stored under `key`
    pub async fn download_stream(&self, key: &str) -> Result<BlobReader, CloudStorageError> {
        self.storage.download_stream(key).await
    }
}
