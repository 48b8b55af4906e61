//! Configuration for the RS-485 bridge.

use std::path::Path;
use std::time::Duration;

use rs485_master::{BusConfig, MAX_SLAVES, SlaveConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serialization::Format;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rs485BridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Serial bus settings
    pub bus: BusConfig,

    /// Slaves to poll (at most 32)
    pub slaves: Vec<SlaveConfig>,

    /// Snapshot publishing settings
    #[serde(default)]
    pub publish: PublishConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Zenoh connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZenohConfig {
    /// Zenoh mode: "client", "peer", or "router".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Endpoints to connect to (for client mode).
    #[serde(default)]
    pub connect: Vec<String>,

    /// Endpoints to listen on (for peer/router mode).
    #[serde(default)]
    pub listen: Vec<String>,
}

fn default_mode() -> String {
    "peer".to_string()
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Vec::new(),
            listen: Vec::new(),
        }
    }
}

/// How and where register snapshots are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Key expression prefix (default: "zensight/rs485")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Publish interval in milliseconds (default: 1000)
    #[serde(default = "default_publish_interval_ms")]
    pub interval_ms: u64,

    /// Payload encoding: "json" or "cbor" (default: "json")
    #[serde(default)]
    pub format: Format,
}

fn default_key_prefix() -> String {
    "zensight/rs485".to_string()
}

fn default_publish_interval_ms() -> u64 {
    1000
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            interval_ms: default_publish_interval_ms(),
            format: Format::default(),
        }
    }
}

impl PublishConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Rs485BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Rs485BridgeConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus
            .validate()
            .map_err(|e| ConfigError::Validation(format!("bus: {}", e)))?;

        if self.slaves.is_empty() {
            return Err(ConfigError::Validation(
                "At least one slave must be configured".to_string(),
            ));
        }

        if self.slaves.len() > MAX_SLAVES {
            return Err(ConfigError::Validation(format!(
                "{} slaves configured, at most {} are supported",
                self.slaves.len(),
                MAX_SLAVES
            )));
        }

        let mut names = std::collections::HashSet::new();
        for slave in &self.slaves {
            slave
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;

            let name = slave.display_name();
            if name.is_empty() || name.contains(['/', '*', '$', '?', '#']) {
                return Err(ConfigError::Validation(format!(
                    "Slave {}: invalid name '{}'",
                    slave.address, name
                )));
            }
            if !names.insert(name.clone()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate slave name '{}'",
                    name
                )));
            }
        }

        if self.publish.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "publish.interval_ms must be positive".to_string(),
            ));
        }

        if self.publish.key_prefix.is_empty() || self.publish.key_prefix.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "invalid publish.key_prefix '{}'",
                self.publish.key_prefix
            )));
        }

        match self.zenoh.mode.as_str() {
            "client" | "peer" | "router" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "Invalid Zenoh mode '{}' (use client, peer, or router)",
                    other
                )));
            }
        }

        Ok(())
    }
}
