//! Configuration file for the LanShare CLI.

use lanshare_core::{DEFAULT_CHUNK_SIZE, EngineConfig, MAX_CHUNK_SIZE};
use lanshare_discovery::DEFAULT_DISCOVERY_PORT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// LanShare CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// This device
    #[serde(default)]
    pub device: DeviceSection,
    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoverySection,
    /// Transfer settings
    #[serde(default)]
    pub transfer: TransferSection,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[device]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Name shown to peers
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// `[discovery]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// UDP discovery port
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Interface address to announce from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<Ipv4Addr>,
    /// Seconds between announcements
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// `[transfer]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Data frame size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Where received payloads are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Seconds to wait for a TCP connect
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default log filter when `-v` is not given
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "LanShare Device".to_string())
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_interval_secs() -> u64 {
    2
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: default_device_name(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            bind_ip: None,
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            output_dir: default_output_dir(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save configuration to file, creating the parent directory
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// `<config dir>/lanshare/config.toml`
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("lanshare/config.toml")
    }

    /// Load from the default path, writing the defaults there on first use
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            if let Err(e) = config.save(&path) {
                tracing::debug!(path = %path.display(), error = %e, "default config not written");
            }
            Ok(config)
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.device.name.trim().is_empty() {
            anyhow::bail!("device.name must not be empty");
        }
        if self.discovery.interval_secs == 0 {
            anyhow::bail!("discovery.interval_secs must be at least 1");
        }
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("transfer.chunk_size must be between 1 and 16MB");
        }
        if self.transfer.connect_timeout_secs == 0 {
            anyhow::bail!("transfer.connect_timeout_secs must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }
        Ok(())
    }

    /// Engine settings derived from this file
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        engine.discovery.port = self.discovery.port;
        engine.discovery.announce_interval = Duration::from_secs(self.discovery.interval_secs);
        engine.transfer.chunk_size = self.transfer.chunk_size;
        engine.transfer.connect_timeout = Duration::from_secs(self.transfer.connect_timeout_secs);
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.discovery.port, DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.transfer.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!config.device.name.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        config.transfer.chunk_size = 64 * 1024;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        config.device.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [device]
            name = "Studio Mac"

            [discovery]
            bind_ip = "192.168.1.10"
            "#,
        )
        .unwrap();
        assert_eq!(config.device.name, "Studio Mac");
        assert_eq!(config.discovery.bind_ip, Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(config.discovery.interval_secs, 2);
        assert_eq!(config.transfer.connect_timeout_secs, 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.transfer.chunk_size = 256 * 1024;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.transfer.chunk_size, 256 * 1024);
        assert_eq!(loaded.engine_config().transfer.chunk_size, 256 * 1024);
    }
}
