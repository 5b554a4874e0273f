//! Configuration module
//!
//! Settings come from the environment (after loading `.env` via dotenvy); every
//! value has a default so that a bare development checkout starts without any
//! configuration. Tests build a config programmatically with [`Config::for_local`].

use std::env;
use std::path::PathBuf;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

const MIB: u64 = 1024 * 1024;

const UPLOAD_MIN_CHUNK_SIZE_BYTES: u64 = MIB;
const UPLOAD_MAX_CHUNK_SIZE_BYTES: u64 = 10 * MIB;
const UPLOAD_MAX_FILE_SIZE_MB: u64 = 2048;
const UPLOAD_MAX_CHUNK_COUNT: u32 = 10_000;
const UPLOAD_SESSION_TTL_SECS: i64 = 86_400;
const UPLOAD_MERGE_LEASE_SECS: i64 = 600;
const USER_STORAGE_QUOTA_MB: u64 = 0;
const DEFAULT_ALLOWED_CONTENT_TYPES: &str =
    "image/*,video/*,audio/*,text/plain,application/pdf,application/zip,application/octet-stream";

const PROXY_BASE_PATH: &str = "/files";
const SIGNED_URL_TTL_SECS: u64 = 3600;
const URL_CACHE_CAPACITY: usize = 1024;

const RETENTION_SWEEP_INTERVAL_SECS: u64 = 300;
const RETENTION_GRACE_PERIOD_SECS: i64 = 600;
const RETENTION_SWEEP_BATCH_SIZE: i64 = 100;

const WORKER_MAX_WORKERS: usize = 4;
const WORKER_QUEUE_CAPACITY: usize = 1024;
const WORKER_MAX_RETRIES: u32 = 3;
const WORKER_RETRY_BASE_DELAY_MS: u64 = 1000;

const THUMBNAIL_MAX_DIMENSION: u32 = 256;

/// Process-level settings.
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
}

/// Chunked upload limits.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub min_chunk_size_bytes: u64,
    pub max_chunk_size_bytes: u64,
    pub max_file_size_bytes: u64,
    pub max_chunk_count: u32,
    pub allowed_content_types: Vec<String>,
    pub session_ttl_secs: i64,
    pub merge_lease_secs: i64,
    pub scratch_path: PathBuf,
    /// Per-owner storage quota. `None` means unlimited.
    pub user_quota_bytes: Option<u64>,
    pub thumbnail_max_dimension: u32,
}

impl UploadConfig {
    /// Allow-list match. Entries may be exact (`image/png`), a subtype
    /// wildcard (`image/*`) or `*`.
    pub fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if content_type.is_empty() {
            return false;
        }
        self.allowed_content_types.iter().any(|allowed| {
            if allowed == "*" || allowed == "*/*" {
                return true;
            }
            match allowed.strip_suffix("/*") {
                Some(major) => content_type
                    .split_once('/')
                    .is_some_and(|(ct_major, _)| ct_major == major),
                None => *allowed == content_type,
            }
        })
    }
}

/// Built-in local channel and URL shaping.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub local_storage_path: PathBuf,
    pub local_storage_base_url: Option<String>,
    /// Global default for the access-mode policy.
    pub hide_remote_url: bool,
    pub proxy_base_path: String,
    pub signed_url_ttl_secs: u64,
    pub url_cache_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub sweep_interval_secs: u64,
    pub grace_period_secs: i64,
    pub sweep_batch_size: i64,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct HoardConfig {
    pub base: BaseConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub worker: WorkerConfig,
}

/// Shared configuration handle.
#[derive(Clone, Debug)]
pub struct Config(pub Box<HoardConfig>);

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = HoardConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    /// Defaults with the scratch area and the built-in local channel rooted at
    /// the given directories. No environment is read.
    pub fn for_local(scratch_path: impl Into<PathBuf>, storage_path: impl Into<PathBuf>) -> Self {
        Config(Box::new(HoardConfig::with_paths(
            scratch_path.into(),
            storage_path.into(),
        )))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.0.validate()
    }

    pub fn as_hoard(&self) -> &HoardConfig {
        &self.0
    }

    pub fn as_hoard_mut(&mut self) -> &mut HoardConfig {
        &mut self.0
    }

    pub fn base(&self) -> &BaseConfig {
        &self.0.base
    }

    pub fn upload(&self) -> &UploadConfig {
        &self.0.upload
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.0.storage
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.0.retention
    }

    pub fn worker(&self) -> &WorkerConfig {
        &self.0.worker
    }

    pub fn database_url(&self) -> &str {
        &self.0.base.database_url
    }

    pub fn is_production(&self) -> bool {
        let env = self.0.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

fn parse_content_types(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn quota_from_mb(mb: u64) -> Option<u64> {
    (mb > 0).then(|| mb * MIB)
}

impl HoardConfig {
    fn with_paths(scratch_path: PathBuf, local_storage_path: PathBuf) -> Self {
        Self {
            base: BaseConfig {
                environment: "development".to_string(),
                database_url: String::new(),
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            },
            upload: UploadConfig {
                min_chunk_size_bytes: UPLOAD_MIN_CHUNK_SIZE_BYTES,
                max_chunk_size_bytes: UPLOAD_MAX_CHUNK_SIZE_BYTES,
                max_file_size_bytes: UPLOAD_MAX_FILE_SIZE_MB * MIB,
                max_chunk_count: UPLOAD_MAX_CHUNK_COUNT,
                allowed_content_types: parse_content_types(DEFAULT_ALLOWED_CONTENT_TYPES),
                session_ttl_secs: UPLOAD_SESSION_TTL_SECS,
                merge_lease_secs: UPLOAD_MERGE_LEASE_SECS,
                scratch_path,
                user_quota_bytes: quota_from_mb(USER_STORAGE_QUOTA_MB),
                thumbnail_max_dimension: THUMBNAIL_MAX_DIMENSION,
            },
            storage: StorageConfig {
                local_storage_path,
                local_storage_base_url: None,
                hide_remote_url: false,
                proxy_base_path: PROXY_BASE_PATH.to_string(),
                signed_url_ttl_secs: SIGNED_URL_TTL_SECS,
                url_cache_capacity: URL_CACHE_CAPACITY,
            },
            retention: RetentionConfig {
                sweep_interval_secs: RETENTION_SWEEP_INTERVAL_SECS,
                grace_period_secs: RETENTION_GRACE_PERIOD_SECS,
                sweep_batch_size: RETENTION_SWEEP_BATCH_SIZE,
            },
            worker: WorkerConfig {
                max_workers: WORKER_MAX_WORKERS,
                queue_capacity: WORKER_QUEUE_CAPACITY,
                max_retries: WORKER_MAX_RETRIES,
                retry_base_delay_ms: WORKER_RETRY_BASE_DELAY_MS,
            },
        }
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
            .parse::<u32>()
            .unwrap_or(MAX_CONNECTIONS);

        let db_timeout_seconds = env::var("DB_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .unwrap_or(CONNECTION_TIMEOUT_SECS);

        let min_chunk_size_bytes = env::var("UPLOAD_MIN_CHUNK_SIZE_BYTES")
            .unwrap_or_else(|_| UPLOAD_MIN_CHUNK_SIZE_BYTES.to_string())
            .parse::<u64>()
            .unwrap_or(UPLOAD_MIN_CHUNK_SIZE_BYTES);

        let max_chunk_size_bytes = env::var("UPLOAD_MAX_CHUNK_SIZE_BYTES")
            .unwrap_or_else(|_| UPLOAD_MAX_CHUNK_SIZE_BYTES.to_string())
            .parse::<u64>()
            .unwrap_or(UPLOAD_MAX_CHUNK_SIZE_BYTES);

        let max_file_size_mb = env::var("UPLOAD_MAX_FILE_SIZE_MB")
            .unwrap_or_else(|_| UPLOAD_MAX_FILE_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(UPLOAD_MAX_FILE_SIZE_MB);

        let max_chunk_count = env::var("UPLOAD_MAX_CHUNK_COUNT")
            .unwrap_or_else(|_| UPLOAD_MAX_CHUNK_COUNT.to_string())
            .parse::<u32>()
            .unwrap_or(UPLOAD_MAX_CHUNK_COUNT);

        let allowed_content_types = parse_content_types(
            &env::var("UPLOAD_ALLOWED_CONTENT_TYPES")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_CONTENT_TYPES.to_string()),
        );

        let session_ttl_secs = env::var("UPLOAD_SESSION_TTL_SECS")
            .unwrap_or_else(|_| UPLOAD_SESSION_TTL_SECS.to_string())
            .parse::<i64>()
            .unwrap_or(UPLOAD_SESSION_TTL_SECS);

        let merge_lease_secs = env::var("UPLOAD_MERGE_LEASE_SECS")
            .unwrap_or_else(|_| UPLOAD_MERGE_LEASE_SECS.to_string())
            .parse::<i64>()
            .unwrap_or(UPLOAD_MERGE_LEASE_SECS);

        let scratch_path = env::var("SCRATCH_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("hoard-scratch"));

        let user_quota_mb = env::var("USER_STORAGE_QUOTA_MB")
            .unwrap_or_else(|_| USER_STORAGE_QUOTA_MB.to_string())
            .parse::<u64>()
            .unwrap_or(USER_STORAGE_QUOTA_MB);

        let thumbnail_max_dimension = env::var("THUMBNAIL_MAX_DIMENSION")
            .unwrap_or_else(|_| THUMBNAIL_MAX_DIMENSION.to_string())
            .parse::<u32>()
            .unwrap_or(THUMBNAIL_MAX_DIMENSION);

        let local_storage_path = env::var("LOCAL_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/files"));

        let local_storage_base_url = env::var("LOCAL_STORAGE_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let hide_remote_url = env::var("HIDE_REMOTE_URL")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let proxy_base_path =
            env::var("PROXY_BASE_PATH").unwrap_or_else(|_| PROXY_BASE_PATH.to_string());

        let signed_url_ttl_secs = env::var("SIGNED_URL_TTL_SECS")
            .unwrap_or_else(|_| SIGNED_URL_TTL_SECS.to_string())
            .parse::<u64>()
            .unwrap_or(SIGNED_URL_TTL_SECS);

        let url_cache_capacity = env::var("URL_CACHE_CAPACITY")
            .unwrap_or_else(|_| URL_CACHE_CAPACITY.to_string())
            .parse::<usize>()
            .unwrap_or(URL_CACHE_CAPACITY);

        let sweep_interval_secs = env::var("RETENTION_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| RETENTION_SWEEP_INTERVAL_SECS.to_string())
            .parse::<u64>()
            .unwrap_or(RETENTION_SWEEP_INTERVAL_SECS);

        let grace_period_secs = env::var("RETENTION_GRACE_PERIOD_SECS")
            .unwrap_or_else(|_| RETENTION_GRACE_PERIOD_SECS.to_string())
            .parse::<i64>()
            .unwrap_or(RETENTION_GRACE_PERIOD_SECS);

        let sweep_batch_size = env::var("RETENTION_SWEEP_BATCH_SIZE")
            .unwrap_or_else(|_| RETENTION_SWEEP_BATCH_SIZE.to_string())
            .parse::<i64>()
            .unwrap_or(RETENTION_SWEEP_BATCH_SIZE);

        let max_workers = env::var("WORKER_MAX_WORKERS")
            .unwrap_or_else(|_| WORKER_MAX_WORKERS.to_string())
            .parse::<usize>()
            .unwrap_or(WORKER_MAX_WORKERS);

        let queue_capacity = env::var("WORKER_QUEUE_CAPACITY")
            .unwrap_or_else(|_| WORKER_QUEUE_CAPACITY.to_string())
            .parse::<usize>()
            .unwrap_or(WORKER_QUEUE_CAPACITY);

        let max_retries = env::var("WORKER_MAX_RETRIES")
            .unwrap_or_else(|_| WORKER_MAX_RETRIES.to_string())
            .parse::<u32>()
            .unwrap_or(WORKER_MAX_RETRIES);

        let retry_base_delay_ms = env::var("WORKER_RETRY_BASE_DELAY_MS")
            .unwrap_or_else(|_| WORKER_RETRY_BASE_DELAY_MS.to_string())
            .parse::<u64>()
            .unwrap_or(WORKER_RETRY_BASE_DELAY_MS);

        Ok(Self {
            base: BaseConfig {
                environment,
                database_url,
                db_max_connections,
                db_timeout_seconds,
            },
            upload: UploadConfig {
                min_chunk_size_bytes,
                max_chunk_size_bytes,
                max_file_size_bytes: max_file_size_mb * MIB,
                max_chunk_count,
                allowed_content_types,
                session_ttl_secs,
                merge_lease_secs,
                scratch_path,
                user_quota_bytes: quota_from_mb(user_quota_mb),
                thumbnail_max_dimension,
            },
            storage: StorageConfig {
                local_storage_path,
                local_storage_base_url,
                hide_remote_url,
                proxy_base_path,
                signed_url_ttl_secs,
                url_cache_capacity,
            },
            retention: RetentionConfig {
                sweep_interval_secs,
                grace_period_secs,
                sweep_batch_size,
            },
            worker: WorkerConfig {
                max_workers,
                queue_capacity,
                max_retries,
                retry_base_delay_ms,
            },
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.base.database_url.is_empty()
            && !self.base.database_url.starts_with("postgres://")
            && !self.base.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        let upload = &self.upload;
        if upload.min_chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_MIN_CHUNK_SIZE_BYTES must be greater than zero"
            ));
        }
        if upload.min_chunk_size_bytes > upload.max_chunk_size_bytes {
            return Err(anyhow::anyhow!(
                "UPLOAD_MIN_CHUNK_SIZE_BYTES ({}) must not exceed UPLOAD_MAX_CHUNK_SIZE_BYTES ({})",
                upload.min_chunk_size_bytes,
                upload.max_chunk_size_bytes
            ));
        }
        if upload.max_chunk_count == 0 {
            return Err(anyhow::anyhow!("UPLOAD_MAX_CHUNK_COUNT must be greater than zero"));
        }
        if upload.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "UPLOAD_ALLOWED_CONTENT_TYPES must list at least one type"
            ));
        }
        if upload.session_ttl_secs <= 0 || upload.merge_lease_secs <= 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_SESSION_TTL_SECS and UPLOAD_MERGE_LEASE_SECS must be positive"
            ));
        }

        if !self.storage.proxy_base_path.starts_with('/') {
            return Err(anyhow::anyhow!("PROXY_BASE_PATH must start with '/'"));
        }
        if self.storage.url_cache_capacity == 0 {
            return Err(anyhow::anyhow!("URL_CACHE_CAPACITY must be greater than zero"));
        }

        if self.retention.grace_period_secs < 0 || self.retention.sweep_batch_size <= 0 {
            return Err(anyhow::anyhow!(
                "RETENTION_GRACE_PERIOD_SECS must be >= 0 and RETENTION_SWEEP_BATCH_SIZE > 0"
            ));
        }

        if self.worker.max_workers == 0 || self.worker.queue_capacity == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_MAX_WORKERS and WORKER_QUEUE_CAPACITY must be greater than zero"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_defaults_validate() {
        let config = Config::for_local("/tmp/scratch", "/tmp/files");
        assert!(config.validate().is_ok());
        assert_eq!(config.upload().min_chunk_size_bytes, MIB);
        assert_eq!(config.upload().max_chunk_size_bytes, 10 * MIB);
        assert_eq!(config.upload().user_quota_bytes, None);
        assert_eq!(config.storage().proxy_base_path, "/files");
    }

    #[test]
    fn inverted_chunk_bounds_rejected() {
        let mut config = Config::for_local("/tmp/scratch", "/tmp/files");
        config.as_hoard_mut().upload.min_chunk_size_bytes = 20 * MIB;
        assert!(config.validate().is_err());
    }

    #[test]
    fn content_type_wildcards() {
        let mut config = Config::for_local("/tmp/scratch", "/tmp/files");
        config.as_hoard_mut().upload.allowed_content_types =
            parse_content_types("image/*, application/pdf");
        let upload = config.upload();

        assert!(upload.is_content_type_allowed("image/png"));
        assert!(upload.is_content_type_allowed("IMAGE/JPEG"));
        assert!(upload.is_content_type_allowed("application/pdf; charset=binary"));
        assert!(!upload.is_content_type_allowed("application/x-msdownload"));
        assert!(!upload.is_content_type_allowed("imagex/png"));
        assert!(!upload.is_content_type_allowed(""));
    }

    #[test]
    fn zero_quota_means_unlimited() {
        assert_eq!(quota_from_mb(0), None);
        assert_eq!(quota_from_mb(2), Some(2 * MIB));
    }
}
