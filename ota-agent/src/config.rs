//! Configuration management for the OTA agent.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`OTA_AGENT__BACKUP__RETENTION_COUNT=3`). Every section has defaults, so a
//! missing file still yields a working configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::errors::{OtaError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub backup: BackupConfig,
    pub schedule: ScheduleConfig,
    pub update: UpdateConfig,
    pub api: ApiConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device identifier; derived from hardware when unset
    pub id: Option<String>,

    /// Product type used to select the manifest
    pub product_type: String,

    /// Working directory for persisted state
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Update server base URL
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Attempts per network call, including the first
    pub max_attempts: u32,

    /// Backoff base in seconds; attempt k waits base * 2^(k-1)
    pub base_delay_secs: u64,

    pub ping_timeout_secs: u64,
    pub manifest_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub report_timeout_secs: u64,

    /// Write buffer size for streamed downloads
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Where archives are written
    pub dir: PathBuf,

    /// Number of most recent backups kept per device. The archive a create
    /// just wrote is always kept, so 0 behaves like 1.
    pub retention_count: usize,

    /// Locations captured in every snapshot
    pub sources: Vec<PathBuf>,

    /// Names, `*.ext` suffixes or relative sub-paths skipped while staging
    pub exclude: Vec<String>,

    /// Archive filename prefix
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily update check times (HH:MM)
    pub check_times: Vec<String>,

    /// Install time used by "install tonight" (HH:MM)
    pub install_time: String,

    /// Scheduler poll interval in seconds
    pub poll_interval_secs: u64,

    /// Sleep after a failed scheduler iteration
    pub error_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Staging directory for downloads
    pub download_dir: PathBuf,

    /// Filesystem whose free space gates an install
    pub disk_check_path: PathBuf,

    /// Expected backup size in MB
    pub backup_estimate_mb: u64,

    /// Extra headroom in MB
    pub safety_buffer_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log output (journald, stdout)
    pub output: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: None,
            product_type: "robot_ai".to_string(),
            data_dir: PathBuf::from("/var/lib/ota-agent"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 5,
            ping_timeout_secs: 5,
            manifest_timeout_secs: 30,
            download_timeout_secs: 300,
            report_timeout_secs: 30,
            chunk_size: 8192,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/backups"),
            retention_count: 2,
            sources: vec![
                PathBuf::from("/opt/robot-ai"),
                PathBuf::from("/etc/robot-ai"),
                PathBuf::from("/etc/ota-agent.toml"),
            ],
            exclude: [
                "*.log",
                "*.tmp",
                "__pycache__",
                ".git",
                "logs",
                "backups",
                "models/cv",
                "models/voices",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            prefix: "robot-ai_backup".to_string(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_times: vec!["03:00".into(), "04:00".into(), "05:00".into()],
            install_time: "03:00".to_string(),
            poll_interval_secs: 10,
            error_backoff_secs: 30,
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("/var/lib/ota-agent/downloads"),
            disk_check_path: PathBuf::from("/"),
            backup_estimate_mb: 500,
            safety_buffer_mb: 100,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stdout".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus `OTA_AGENT__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("OTA_AGENT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("schedule.check_times")
                    .with_list_parse_key("backup.sources")
                    .with_list_parse_key("backup.exclude")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| OtaError::Config(e.to_string()))
    }

    /// Parse configuration from a TOML string (no environment layering).
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OtaError::Config(e.to_string()))
    }

    pub fn state_file(&self) -> PathBuf {
        self.device.data_dir.join("state.json")
    }

    pub fn device_id_file(&self) -> PathBuf {
        self.device.data_dir.join("device_id")
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api.bind, self.api.port)
            .parse()
            .map_err(|e| OtaError::Config(format!("invalid api address: {}", e)))
    }
}

impl NetworkConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }
}

impl ScheduleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backup.retention_count, 2);
        assert_eq!(config.network.max_attempts, 5);
        assert_eq!(config.network.base_delay_secs, 5);
        assert_eq!(config.schedule.poll_interval_secs, 10);
        assert_eq!(config.schedule.check_times, vec!["03:00", "04:00", "05:00"]);
        assert_eq!(config.update.backup_estimate_mb, 500);
        assert_eq!(config.update.safety_buffer_mb, 100);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            url = "http://updates.example.com"

            [backup]
            retention_count = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.server.url, "http://updates.example.com");
        assert_eq!(config.backup.retention_count, 5);
        assert_eq!(config.backup.prefix, "robot-ai_backup");
        assert_eq!(config.device.product_type, "robot_ai");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "[device]\nproduct_type = \"rover\"\n[schedule]\ncheck_times = [\"01:30\"]\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.device.product_type, "rover");
        assert_eq!(config.schedule.check_times, vec!["01:30"]);
        assert_eq!(config.state_file(), PathBuf::from("/var/lib/ota-agent/state.json"));
    }

    #[test]
    fn test_api_addr() {
        let config = Config::default();
        assert_eq!(config.api_addr().unwrap().port(), 8790);
    }
}
