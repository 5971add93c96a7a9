//! Configuration for the audit archive
//!
//! Defines configuration structs for the archive store and its deletion
//! worker, loadable from TOML or from `AUDIT_ARCHIVE_*` environment
//! variables.

use super::blob_store::{BlobStore, InMemoryBlobStore, LocalFsBlobStore};
use super::error::{ArchiveError, ArchiveResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Bucket used when none is configured. Not for production.
pub const DEFAULT_BUCKET: &str = "audit-archive-dev";

/// Keys per bulk delete request; the S3 DeleteObjects limit is 1000
pub const DEFAULT_DELETE_PAGE_SIZE: usize = 256;

/// A queue entry is only removed after the tenant prefix has been purged
/// at least this many times in succession
pub const MIN_PURGE_PASSES: u32 = 2;

/// Main configuration for the archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Bucket (or container) holding every tenant's archive
    pub bucket: String,
    /// Blob store type
    pub store_type: BlobStoreType,
    /// Local filesystem path (for LocalFs store)
    pub local_path: Option<PathBuf>,
    /// S3 configuration (for S3 store)
    #[cfg(feature = "s3")]
    pub s3: Option<S3Config>,
    /// Pod tag written into each archived event's metadata
    pub pod: Option<String>,
    /// Deletion worker settings
    pub deletion: DeletionConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            bucket: DEFAULT_BUCKET.to_string(),
            store_type: BlobStoreType::InMemory,
            local_path: None,
            #[cfg(feature = "s3")]
            s3: None,
            pod: None,
            deletion: DeletionConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Create config for local development
    pub fn local(path: PathBuf) -> Self {
        ArchiveConfig {
            store_type: BlobStoreType::LocalFs,
            local_path: Some(path),
            ..ArchiveConfig::default()
        }
    }

    /// Create config for testing (in-memory)
    pub fn test() -> Self {
        ArchiveConfig {
            bucket: "test".to_string(),
            pod: Some("test-pod".to_string()),
            deletion: DeletionConfig::test(),
            ..ArchiveConfig::default()
        }
    }

    /// Parse from a TOML document; missing fields take their defaults
    pub fn from_toml_str(raw: &str) -> ArchiveResult<Self> {
        let file: ArchiveConfigFile = toml::from_str(raw)
            .map_err(|e| ArchiveError::InvalidArgument(format!("invalid config: {}", e)))?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> ArchiveResult<Self> {
        let mut config = ArchiveConfig::default();

        if let Ok(bucket) = std::env::var("AUDIT_ARCHIVE_BUCKET") {
            config.bucket = bucket;
        }
        if let Ok(store) = std::env::var("AUDIT_ARCHIVE_STORE") {
            config.store_type = BlobStoreType::parse(&store)?;
        }
        if let Ok(path) = std::env::var("AUDIT_ARCHIVE_LOCAL_PATH") {
            config.local_path = Some(PathBuf::from(path));
        }
        if let Ok(pod) = std::env::var("AUDIT_ARCHIVE_POD") {
            config.pod = Some(pod);
        }
        if let Ok(size) = std::env::var("AUDIT_ARCHIVE_DELETE_PAGE_SIZE") {
            config.deletion.page_size = parse_env_number("AUDIT_ARCHIVE_DELETE_PAGE_SIZE", &size)?;
        }
        if let Ok(ms) = std::env::var("AUDIT_ARCHIVE_SWEEP_INTERVAL_MS") {
            config.deletion.sweep_interval =
                Duration::from_millis(parse_env_number("AUDIT_ARCHIVE_SWEEP_INTERVAL_MS", &ms)?);
        }

        #[cfg(feature = "s3")]
        {
            if config.store_type == BlobStoreType::S3 {
                config.s3 = Some(S3Config {
                    prefix: std::env::var("AUDIT_ARCHIVE_S3_PREFIX").unwrap_or_default(),
                    region: std::env::var("AUDIT_ARCHIVE_S3_REGION")
                        .unwrap_or_else(|_| "us-east-1".to_string()),
                    endpoint: std::env::var("AUDIT_ARCHIVE_S3_ENDPOINT").ok(),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ArchiveResult<()> {
        if self.bucket.is_empty() {
            return Err(ArchiveError::InvalidArgument(
                "bucket must not be empty".to_string(),
            ));
        }
        if self.deletion.page_size == 0 || self.deletion.page_size > 1000 {
            return Err(ArchiveError::InvalidArgument(format!(
                "delete page size must be within 1..=1000, got {}",
                self.deletion.page_size
            )));
        }
        if self.deletion.purge_passes < MIN_PURGE_PASSES {
            return Err(ArchiveError::InvalidArgument(format!(
                "purge passes must be at least {}, got {}",
                MIN_PURGE_PASSES, self.deletion.purge_passes
            )));
        }
        Ok(())
    }

    /// Build the configured blob store backend
    pub async fn open_store(&self) -> ArchiveResult<Arc<dyn BlobStore>> {
        match self.store_type {
            BlobStoreType::InMemory => Ok(Arc::new(InMemoryBlobStore::new())),
            BlobStoreType::LocalFs => {
                let base = self
                    .local_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("./data").join(&self.bucket));
                std::fs::create_dir_all(&base)?;
                Ok(Arc::new(LocalFsBlobStore::new(base)))
            }
            #[cfg(feature = "s3")]
            BlobStoreType::S3 => {
                let s3 = self.s3.clone().unwrap_or_default();
                let store = super::s3_store::S3BlobStore::new(&self.bucket, &s3).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

fn parse_env_number<T: std::str::FromStr>(name: &str, raw: &str) -> ArchiveResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ArchiveError::InvalidArgument(format!("{} is not a number: {}", name, raw)))
}

/// TOML shape, where every section is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArchiveConfigFile {
    bucket: Option<String>,
    store_type: Option<BlobStoreType>,
    local_path: Option<PathBuf>,
    #[cfg(feature = "s3")]
    s3: Option<S3Config>,
    pod: Option<String>,
    deletion: Option<DeletionConfig>,
}

impl ArchiveConfigFile {
    fn into_config(self) -> ArchiveConfig {
        let defaults = ArchiveConfig::default();
        ArchiveConfig {
            bucket: self.bucket.unwrap_or(defaults.bucket),
            store_type: self.store_type.unwrap_or(defaults.store_type),
            local_path: self.local_path,
            #[cfg(feature = "s3")]
            s3: self.s3,
            pod: self.pod,
            deletion: self.deletion.unwrap_or(defaults.deletion),
        }
    }
}

/// Type of blob store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobStoreType {
    /// In-memory store (for tests)
    InMemory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3,
}

impl BlobStoreType {
    fn parse(raw: &str) -> ArchiveResult<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "memory" | "inmemory" => Ok(BlobStoreType::InMemory),
            "local" | "localfs" => Ok(BlobStoreType::LocalFs),
            #[cfg(feature = "s3")]
            "s3" => Ok(BlobStoreType::S3),
            other => Err(ArchiveError::InvalidArgument(format!(
                "unknown store type: {}",
                other
            ))),
        }
    }
}

/// S3 configuration; the bucket comes from `ArchiveConfig::bucket`
#[cfg(feature = "s3")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Key prefix within bucket
    pub prefix: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
}

#[cfg(feature = "s3")]
impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            prefix: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

/// Tenant deletion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Keys per bulk delete request (default: 256)
    pub page_size: usize,
    /// Tenant-wide delete passes before the queue entry is removed
    /// (default and minimum: 2)
    pub purge_passes: u32,
    /// Interval between unprompted queue sweeps; zero disables them
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        DeletionConfig {
            page_size: DEFAULT_DELETE_PAGE_SIZE,
            purge_passes: MIN_PURGE_PASSES,
            sweep_interval: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl DeletionConfig {
    /// Configuration for tests (small pages, sweeps only when triggered)
    pub fn test() -> Self {
        DeletionConfig {
            page_size: 16,
            purge_passes: MIN_PURGE_PASSES,
            sweep_interval: Duration::ZERO,
        }
    }

    pub fn sweeps_enabled(&self) -> bool {
        !self.sweep_interval.is_zero()
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArchiveConfig::default();
        assert_eq!(config.bucket, "audit-archive-dev");
        assert_eq!(config.store_type, BlobStoreType::InMemory);
        assert_eq!(config.deletion.page_size, 256);
        assert_eq!(config.deletion.purge_passes, 2);
    }

    #[test]
    fn test_local_config() {
        let config = ArchiveConfig::local(PathBuf::from("/tmp/audit-archive"));
        assert_eq!(config.store_type, BlobStoreType::LocalFs);
        assert_eq!(config.local_path, Some(PathBuf::from("/tmp/audit-archive")));
    }

    #[test]
    fn test_deletion_config_serialization() {
        let config = DeletionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"sweep_interval\":3600000"));
        let parsed: DeletionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.sweep_interval, parsed.sweep_interval);
        assert_eq!(config.page_size, parsed.page_size);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ArchiveConfig::from_toml_str(
            r#"
            bucket = "audit-archive-prod"
            pod = "stg01-useast1"

            [deletion]
            sweep_interval = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.bucket, "audit-archive-prod");
        assert_eq!(config.pod.as_deref(), Some("stg01-useast1"));
        assert_eq!(config.deletion.page_size, 256);
        assert!(!config.deletion.sweeps_enabled());
    }

    #[test]
    fn test_from_toml_rejects_bad_page_size() {
        let result = ArchiveConfig::from_toml_str("[deletion]\npage_size = 5000\n");
        assert!(matches!(result, Err(ArchiveError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_toml_rejects_single_purge_pass() {
        for passes in [0, 1] {
            let raw = format!("[deletion]\npurge_passes = {}\n", passes);
            let result = ArchiveConfig::from_toml_str(&raw);
            assert!(matches!(result, Err(ArchiveError::InvalidArgument(_))), "passes = {}", passes);
        }
        let config = ArchiveConfig::from_toml_str("[deletion]\npurge_passes = 3\n").unwrap();
        assert_eq!(config.deletion.purge_passes, 3);
    }

    #[test]
    fn test_store_type_parse() {
        assert_eq!(BlobStoreType::parse("LocalFs").unwrap(), BlobStoreType::LocalFs);
        assert_eq!(BlobStoreType::parse("memory").unwrap(), BlobStoreType::InMemory);
        assert!(BlobStoreType::parse("floppy").is_err());
    }

    #[tokio::test]
    async fn test_open_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArchiveConfig::local(dir.path().join("archive"));
        let store = config.open_store().await.unwrap();

        assert!(!store.exists("anything").await.unwrap());
        assert!(dir.path().join("archive").is_dir());
    }
}
