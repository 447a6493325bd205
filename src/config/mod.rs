//! # Configuration Management Module
//!
//! TOML configuration for the bot binary: which serial port to use, how the session
//! identifies itself and which channels it listens to.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshcore_bot::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Serial Port: {:?}", config.meshcore.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [meshcore]
//! port = "/dev/ttyUSB0"     # omit to run in simulation mode
//! baud_rate = 115200
//! node_name = "MCWB"
//! settle_delay_ms = 300
//! poll_interval_ms = 20
//! channel_filter = ["weather", "alerts"]
//! default_channel = "weather"
//!
//! [logging]
//! level = "info"
//! file = "meshcore-bot.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::meshcore::protocol::MAX_APP_NAME_LEN;
use crate::meshcore::session::SessionConfig;
use crate::meshcore::transport::{is_supported_baud, SUPPORTED_BAUD_RATES};
use crate::validation::{validate_channel_name, validate_node_name};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub meshcore: MeshCoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshCoreConfig {
    /// Serial device of the companion radio. Unset runs in simulation mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Session identifier sent with the init command (max 32 bytes).
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// Wait after the init command before the radio is considered ready (ms).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Listener polling period (ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Only deliver messages from these named channels. Empty accepts all.
    #[serde(default)]
    pub channel_filter: Vec<String>,
    /// Channel used by `send` when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_node_name() -> String {
    "MCWB".to_string()
}

fn default_settle_delay_ms() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for MeshCoreConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            node_name: default_node_name(),
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_filter: Vec::new(),
            default_channel: None,
        }
    }
}

impl MeshCoreConfig {
    /// Library session settings derived from this section.
    pub fn session_config(&self) -> SessionConfig {
        let channel_filter = if self.channel_filter.is_empty() {
            None
        } else {
            Some(self.channel_filter.iter().cloned().collect::<HashSet<_>>())
        };
        SessionConfig {
            node_name: self.node_name.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            channel_filter,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings the radio would refuse, before any port is opened.
    pub fn validate(&self) -> Result<()> {
        let mc = &self.meshcore;
        if !is_supported_baud(mc.baud_rate) {
            return Err(anyhow!(
                "Unsupported baud rate {} (expected one of {:?})",
                mc.baud_rate,
                SUPPORTED_BAUD_RATES
            ));
        }
        validate_node_name(&mc.node_name).map_err(|e| {
            anyhow!(
                "Invalid node_name '{}': {} (max {} bytes)",
                mc.node_name,
                e,
                MAX_APP_NAME_LEN
            )
        })?;
        for name in mc.channel_filter.iter().chain(mc.default_channel.iter()) {
            validate_channel_name(name)
                .map_err(|e| anyhow!("Invalid channel name '{}': {}", name, e))?;
        }
        if mc.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            meshcore: MeshCoreConfig {
                port: Some("/dev/ttyUSB0".to_string()),
                ..MeshCoreConfig::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshcore-bot.log".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.meshcore.baud_rate, 115200);
        assert_eq!(config.meshcore.node_name, "MCWB");
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: Config = toml::from_str("[meshcore]\n").unwrap();
        assert!(config.meshcore.port.is_none());
        assert_eq!(config.meshcore.settle_delay_ms, 300);
        assert_eq!(config.logging.level, "info");
        assert!(config.meshcore.session_config().channel_filter.is_none());
    }

    #[test]
    fn test_session_config_conversion() {
        let config: Config = toml::from_str(
            r#"
            [meshcore]
            port = "/dev/ttyACM0"
            node_name = "WXBOT"
            settle_delay_ms = 50
            poll_interval_ms = 5
            channel_filter = ["weather", "alerts"]
            "#,
        )
        .unwrap();
        let session = config.meshcore.session_config();
        assert_eq!(session.node_name, "WXBOT");
        assert_eq!(session.settle_delay, Duration::from_millis(50));
        assert_eq!(session.poll_interval, Duration::from_millis(5));
        let filter = session.channel_filter.unwrap();
        assert!(filter.contains("weather") && filter.contains("alerts"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.meshcore.baud_rate = 12345;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.meshcore.node_name = "x".repeat(MAX_APP_NAME_LEN + 1);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.meshcore.channel_filter = vec!["".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.meshcore.default_channel = Some(" weather".to_string());
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.meshcore.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(loaded.logging.file.as_deref(), Some("meshcore-bot.log"));
    }

    #[tokio::test]
    async fn test_load_missing_file_names_path() {
        let err = Config::load("/nonexistent/meshcore.toml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/meshcore.toml"));
    }
}
