use crate::cloud_storage::S3Config;
use crate::import::{CompensationPolicy, IngestConfig, RetryPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const ENV_PREFIX: &str = "MUSIC_INGEST_";
const DEFAULT_PLAY_BASE_URL: &str = "http://localhost:8080/play";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(String),
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("Failed to determine home directory")]
    NoHomeDir,
}

/// Where uploaded track content is stored
#[derive(Clone, Debug, PartialEq)]
pub enum StorageConfig {
    /// Plain directory on the local filesystem
    Local { path: PathBuf },
    S3(S3Config),
}

/// Application configuration
///
/// Loaded from a `.env` file (when present) and `MUSIC_INGEST_*` environment
/// variables. Everything except the S3 credentials has a default.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub storage: StorageConfig,
    pub max_upload_workers: usize,
    pub upload_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub compensation: CompensationPolicy,
    /// Prefix of the playback URL handed out in search results
    pub play_base_url: String,
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded {}", path.display()),
            Err(_) => debug!("No .env file found, using process environment"),
        }

        let data_dir = dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join(".music-ingest");

        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    ///
    /// `lookup` receives full variable names, prefix included. Unset paths
    /// default to locations under `data_dir`.
    pub fn from_lookup<F>(data_dir: PathBuf, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let database_path = vars
            .get("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("catalog.db"));

        let storage_mode = vars.get("STORAGE").unwrap_or_else(|| "local".to_string());
        let storage = match storage_mode.trim().to_lowercase().as_str() {
            "local" => StorageConfig::Local {
                path: vars
                    .get("LOCAL_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| data_dir.join("storage")),
            },
            "s3" => StorageConfig::S3(S3Config {
                bucket_name: vars.require("S3_BUCKET")?,
                region: vars.require("S3_REGION")?,
                access_key_id: vars.require("S3_ACCESS_KEY_ID")?,
                secret_access_key: vars.require("S3_SECRET_ACCESS_KEY")?,
                endpoint_url: vars.get("S3_ENDPOINT_URL"),
            }),
            _ => {
                return Err(ConfigError::Invalid {
                    key: format!("{}STORAGE", ENV_PREFIX),
                    value: storage_mode,
                    reason: "expected `local` or `s3`".to_string(),
                })
            }
        };

        let defaults = IngestConfig::default();
        let default_retry = defaults.retry_policy.clone();

        let backoff_multiplier: f64 = vars
            .parse("BACKOFF_MULTIPLIER")?
            .unwrap_or(default_retry.backoff_multiplier);
        if !backoff_multiplier.is_finite() || backoff_multiplier < 0.0 {
            return Err(ConfigError::Invalid {
                key: format!("{}BACKOFF_MULTIPLIER", ENV_PREFIX),
                value: backoff_multiplier.to_string(),
                reason: "expected a finite, non-negative number".to_string(),
            });
        }

        let retry_policy = RetryPolicy {
            max_retries: vars.parse("MAX_RETRIES")?.unwrap_or(default_retry.max_retries),
            initial_backoff: vars
                .parse::<u64>("INITIAL_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default_retry.initial_backoff),
            max_backoff: vars
                .parse::<u64>("MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default_retry.max_backoff),
            backoff_multiplier,
        };

        let config = Config {
            database_path,
            storage,
            max_upload_workers: vars
                .parse("MAX_UPLOAD_WORKERS")?
                .unwrap_or(defaults.max_upload_workers),
            upload_timeout: vars
                .parse::<u64>("UPLOAD_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.upload_timeout),
            retry_policy,
            compensation: vars
                .parse("COMPENSATION")?
                .unwrap_or(defaults.compensation),
            play_base_url: vars
                .get("PLAY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PLAY_BASE_URL.to_string()),
        };

        info!(
            database = %config.database_path.display(),
            storage = config.storage_label(),
            workers = config.max_upload_workers,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Tuning handed to the ingest service
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            max_upload_workers: self.max_upload_workers,
            upload_timeout: self.upload_timeout,
            retry_policy: self.retry_policy.clone(),
            compensation: self.compensation,
        }
    }

    fn storage_label(&self) -> &'static str {
        match self.storage {
            StorageConfig::Local { .. } => "local",
            StorageConfig::S3(_) => "s3",
        }
    }
}

/// Prefixed variable lookup with typed parsing
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of `<prefix><name>`; empty values count as unset
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::Missing(format!("{}{}", ENV_PREFIX, name)))
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let parsed = value.trim().parse::<T>();
        match parsed {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                key: format!("{}{}", ENV_PREFIX, name),
                value,
                reason: e.to_string(),
            }),
        }
    }
}
