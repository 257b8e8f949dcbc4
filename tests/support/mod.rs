#![allow(dead_code)]

pub mod mock_cloud_storage;

pub use mock_cloud_storage::MockCloudStorage;

use music_ingest::catalog::CatalogManager;
use music_ingest::cloud_storage::CloudStorageManager;
use music_ingest::db::Database;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Catalog on a fresh SQLite file, backed by an in-memory blob store
pub struct TestEnv {
    pub catalog: Arc<CatalogManager>,
    pub cloud_storage: CloudStorageManager,
    pub mock_storage: Arc<MockCloudStorage>,
    pub source_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_storage(MockCloudStorage::new()).await
    }

    pub async fn with_storage(mock_storage: MockCloudStorage) -> Self {
        tracing_init();

        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("catalog.db");
        let source_dir = temp_dir.path().join("music");
        std::fs::create_dir_all(&source_dir).unwrap();

        let database = Database::new(db_path.to_str().unwrap())
            .await
            .expect("Failed to create database");

        let mock_storage = Arc::new(mock_storage);
        let cloud_storage = CloudStorageManager::from_storage(mock_storage.clone());
        let catalog = Arc::new(CatalogManager::new(database, cloud_storage.clone()));

        TestEnv {
            catalog,
            cloud_storage,
            mock_storage,
            source_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Write a fake audio file at `<source>/<album>/<file_name>`
    pub fn add_track(&self, album: &str, file_name: &str) -> PathBuf {
        write_file(&self.source_dir.join(album).join(file_name), file_name.as_bytes())
    }
}

pub fn write_file(path: &Path, contents: &[u8]) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
    path.to_path_buf()
}
