use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{
    IMPORT_RETRY_CEILING, MAX_SERVER_DOWNTIME_SECS, MONITOR_FREQUENCY_SECS, WORKER_TIMEOUT_SECS,
};
use crate::store::StoreSettings;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dealer: DealerConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DealerConfig {
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: i64,
    /// Used when a worker doesn't send its own monitor frequency
    #[serde(default = "default_monitor_frequency")]
    pub monitor_frequency_secs: i64,
    #[serde(default = "default_max_server_downtime")]
    pub max_server_downtime_secs: i64,
    #[serde(default = "default_import_retry_ceiling")]
    pub import_retry_ceiling: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// How often the listing is rebuilt and the store mirrored to disk
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_worker_timeout() -> i64 {
    WORKER_TIMEOUT_SECS
}

fn default_monitor_frequency() -> i64 {
    MONITOR_FREQUENCY_SECS
}

fn default_max_server_downtime() -> i64 {
    MAX_SERVER_DOWNTIME_SECS
}

fn default_import_retry_ceiling() -> u64 {
    IMPORT_RETRY_CEILING
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/p2pd-dealer/monitor.db")
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for DealerConfig {
    fn default() -> Self {
        Self {
            worker_timeout_secs: default_worker_timeout(),
            monitor_frequency_secs: default_monitor_frequency(),
            max_server_downtime_secs: default_max_server_downtime(),
            import_retry_ceiling: default_import_retry_ceiling(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl DealerConfig {
    pub fn to_settings(&self) -> StoreSettings {
        StoreSettings {
            worker_timeout: self.worker_timeout_secs,
            max_server_downtime: self.max_server_downtime_secs,
            import_retry_ceiling: self.import_retry_ceiling,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        if config.dealer.worker_timeout_secs <= 0 || config.dealer.monitor_frequency_secs <= 0 {
            anyhow::bail!("dealer timeouts must be positive");
        }
        if config.mirror.refresh_interval_secs == 0 {
            anyhow::bail!("mirror.refresh_interval_secs must be positive");
        }
        Ok(config)
    }
}
