//! Configuration for profile-sync

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::error::{Result, SyncError};
use crate::store::RemoteSchema;

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("profile-sync")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub remotes: RemotesConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the sled database (local replicas + retry queue)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Keep a replica on this device
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum bytes of encoded profiles (0 = unlimited)
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,

    /// Replicas of other users older than this are evicted
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Upper bound on locally kept replicas
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quota_bytes: default_quota_bytes(),
            retention_days: default_retention_days(),
            max_records: default_max_records(),
        }
    }
}

impl LocalConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotesConfig {
    /// Remote database of record
    #[serde(default)]
    pub primary: Option<RemoteConfig>,

    #[serde(default)]
    pub secondary: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,

    /// Sent as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    pub schema: RemoteSchema,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Deadline for any single store call
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Periodic retry-queue drain
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Failed attempts before a queued write is dropped
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// How often the primary remote is probed for connectivity
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout(),
            drain_interval_secs: default_drain_interval(),
            retry_ceiling: default_retry_ceiling(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

impl SyncConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        CacheConfig {
            capacity: settings.capacity,
            ttl: Duration::from_secs(settings.ttl_secs),
        }
    }
}

// Defaults
fn default_true() -> bool { true }
fn default_quota_bytes() -> u64 { 5 * 1024 * 1024 } // 5MB
fn default_retention_days() -> u64 { 30 }
fn default_max_records() -> usize { 500 }
fn default_request_timeout() -> u64 { 8_000 }
fn default_store_timeout() -> u64 { 8_000 }
fn default_drain_interval() -> u64 { 30 }
fn default_retry_ceiling() -> u32 { 3 }
fn default_probe_interval() -> u64 { 15 }
fn default_cache_capacity() -> usize { 256 }
fn default_cache_ttl() -> u64 { 300 }

impl Config {
    /// Load from `path`, or fall back to defaults when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("reading {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("parsing {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.local.enabled && self.remotes.primary.is_none() && self.remotes.secondary.is_none() {
            return Err(SyncError::Config("no backing store configured".into()));
        }
        if self.sync.retry_ceiling == 0 {
            return Err(SyncError::Config("sync.retry_ceiling must be at least 1".into()));
        }
        if self.sync.store_timeout_ms == 0 {
            return Err(SyncError::Config("sync.store_timeout_ms must be positive".into()));
        }
        if self.sync.drain_interval_secs == 0 {
            return Err(SyncError::Config("sync.drain_interval_secs must be positive".into()));
        }
        if self.sync.probe_interval_secs == 0 {
            return Err(SyncError::Config("sync.probe_interval_secs must be positive".into()));
        }
        if self.cache.capacity == 0 {
            return Err(SyncError::Config("cache.capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.node.data_dir.join("profiles.sled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.local.enabled);
        assert_eq!(config.sync.retry_ceiling, 3);
        assert_eq!(config.sync.store_timeout(), Duration::from_secs(8));
        assert!(config.remotes.primary.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
[node]
data_dir = "/tmp/profile-sync"

[local]
quota_bytes = 1024
retention_days = 7

[remotes.primary]
base_url = "https://db.example.com"
schema = "relational"
api_key = "anon"

[remotes.secondary]
base_url = "https://docs.example.com/v1"
schema = "document"
request_timeout_ms = 2000

[sync]
store_timeout_ms = 5000
retry_ceiling = 5

[cache]
capacity = 10
"#,
        )
        .unwrap();

        assert_eq!(config.db_path(), PathBuf::from("/tmp/profile-sync/profiles.sled"));
        assert_eq!(config.local.retention(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.local.max_records, 500);
        let primary = config.remotes.primary.unwrap();
        assert_eq!(primary.schema, RemoteSchema::Relational);
        assert_eq!(primary.request_timeout_ms, 8_000);
        let secondary = config.remotes.secondary.unwrap();
        assert_eq!(secondary.schema, RemoteSchema::Document);
        assert_eq!(secondary.request_timeout_ms, 2_000);
        assert_eq!(config.sync.retry_ceiling, 5);
        assert_eq!(CacheConfig::from(&config.cache).capacity, 10);
    }

    #[test]
    fn test_validate_rejects_no_stores() {
        let mut config = Config::default();
        config.local.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals_and_capacity() {
        for toml_str in [
            "[sync]\ndrain_interval_secs = 0",
            "[sync]\nprobe_interval_secs = 0",
            "[cache]\ncapacity = 0",
        ] {
            let config: Config = toml::from_str(toml_str).unwrap();
            assert!(
                matches!(config.validate(), Err(SyncError::Config(_))),
                "accepted: {}",
                toml_str
            );
        }
    }

    #[test]
    fn test_load_rejects_zero_drain_interval() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("profile-sync.toml");
        std::fs::write(&path, "[sync]\ndrain_interval_secs = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load("/nonexistent/profile-sync.toml").unwrap();
        assert_eq!(config.cache.capacity, 256);
    }
}
