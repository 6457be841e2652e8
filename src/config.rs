use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub watch: WatchConfig,
    pub queue: QueueConfig,
    pub batch: BatchConfig,
    pub dest: DestConfig,
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WatchConfig {
    pub nextcloud_data_root: Option<PathBuf>,
    #[serde(default)]
    pub user_include: Vec<String>,
    #[serde(default)]
    pub user_exclude: Vec<String>,
    #[serde(default)]
    pub custom_folders: Vec<CustomFolderConfig>,
    pub debounce_ms: u64,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CustomFolderConfig {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub archive_on_move: bool,
    #[serde(default)]
    pub archive_root: Option<PathBuf>,
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DestConfig {
    pub import_dir: PathBuf,
    pub albums_path: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    Local,
    Cluster,
    Auto,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    #[serde(default = "default_container_engine")]
    pub container_engine: String,
    pub nextcloud_container: String,
    pub photoprism_container: String,
    pub command_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_container_engine() -> String {
    "docker".to_string()
}

fn default_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default)]
    pub private_key_path: PathBuf,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_pool_wait_retries")]
    pub max_pool_wait_retries: u32,
}

fn default_proxy_port() -> u16 {
    2222
}
fn default_cache_ttl() -> u64 {
    60
}
fn default_max_errors() -> u32 {
    3
}
fn default_health_timeout_ms() -> u64 {
    5000
}
fn default_max_connections() -> usize {
    5
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_pool_wait_retries() -> u32 {
    3
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            proxy_port: default_proxy_port(),
            private_key_path: PathBuf::new(),
            cache_ttl_secs: default_cache_ttl(),
            max_errors: default_max_errors(),
            health_timeout_ms: default_health_timeout_ms(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_pool_wait_retries: default_pool_wait_retries(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.nextcloud_data_root.is_none() && self.watch.custom_folders.is_empty() {
            return Err(ConfigError::ValidationError(
                "watch must configure nextcloud_data_root or at least one custom folder"
                    .to_string(),
            ));
        }

        if self.watch.debounce_ms > 60_000 {
            return Err(ConfigError::ValidationError(format!(
                "watch.debounce_ms must be at most 60000, got {}",
                self.watch.debounce_ms
            )));
        }

        if self.watch.allowed_extensions.is_empty() {
            return Err(ConfigError::ValidationError(
                "watch.allowed_extensions cannot be empty".to_string(),
            ));
        }

        if self.queue.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue.capacity must be greater than zero".to_string(),
            ));
        }

        if self.batch.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch.batch_size must be greater than zero".to_string(),
            ));
        }

        if self.executor.mode == ExecutorMode::Cluster
            && self.cluster.private_key_path.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "cluster.private_key_path is required when executor.mode = cluster".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            watch: WatchConfig {
                nextcloud_data_root: Some(PathBuf::from("/srv/nextcloud/data")),
                user_include: vec![],
                user_exclude: vec![],
                custom_folders: vec![],
                debounce_ms: 3000,
                allowed_extensions: vec!["jpg".into(), "png".into()],
            },
            queue: QueueConfig {
                capacity: 1000,
                snapshot_path: None,
            },
            batch: BatchConfig {
                batch_size: 10,
                batch_timeout_ms: 30_000,
            },
            dest: DestConfig {
                import_dir: PathBuf::from("/imp"),
                albums_path: "/alb".into(),
            },
            executor: ExecutorConfig {
                mode: ExecutorMode::Local,
                container_engine: "docker".into(),
                nextcloud_container: "nextcloud".into(),
                photoprism_container: "photoprism".into(),
                command_timeout_ms: 30_000,
                retries: 3,
            },
            cluster: ClusterConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn missing_sources_fails() {
        let mut config = test_config();
        config.watch.nextcloud_data_root = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_debounce_fails() {
        let mut config = test_config();
        config.watch.debounce_ms = 120_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_extensions_fails() {
        let mut config = test_config();
        config.watch.allowed_extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cluster_mode_requires_key() {
        let mut config = test_config();
        config.executor.mode = ExecutorMode::Cluster;
        assert!(config.validate().is_err());
    }
}
