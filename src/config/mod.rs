//! # Configuration Management Module
//!
//! Node configuration is loaded once at boot and is read-only afterwards.
//! Components receive the pieces they need (most importantly the
//! [`NodeCapabilities`] flags) by value at construction time; nothing reads
//! configuration through globals.
//!
//! ## Configuration Structure
//!
//! - [`NodeConfig`] - identity and tick timing
//! - [`NodeCapabilities`] - what this node is allowed to do
//! - [`SerialConfig`] - host link settings
//! - [`JobConfig`] - one periodic telemetry job
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshnode::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("meshnode.toml").await?;
//!     println!("Node id: {}", config.node.node_id);
//!     Config::create_default("meshnode.example.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [node]
//! node_id = 23
//! tick_ms = 1000
//! send_wait_ms = 200
//!
//! [capabilities]
//! allow_remote_commands = false
//! bridge_mesh_to_serial = true
//! accept_serial_commands = true
//!
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//! write_timeout_ms = 100
//!
//! [[jobs]]
//! name = "bme"
//! kind = "bme"
//! period = 3
//! offset = 1
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::serial::MAX_LINE_PAYLOAD;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node.tick_ms must be greater than zero")]
    ZeroTick,

    #[error("serial.write_timeout_ms must be greater than zero")]
    ZeroWriteTimeout,

    #[error("serial.max_line_len must be {expected} (got {got})")]
    LineLength { got: usize, expected: usize },

    #[error("job '{0}' has a zero period")]
    ZeroPeriod(String),

    #[error("job '{name}' offset {offset} must be below its period {period}")]
    OffsetOutOfRange {
        name: String,
        offset: u32,
        period: u32,
    },

    #[error("job name '{0}' is used more than once")]
    DuplicateJob(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub capabilities: NodeCapabilities,
    pub serial: SerialConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: u8,
    /// Scheduler tick period (ms).
    pub tick_ms: u64,
    /// Upper bound on waiting for a tick's mesh sends (ms).
    #[serde(default = "default_send_wait_ms")]
    pub send_wait_ms: u64,
    /// Broadcast a Reset envelope when the node starts.
    #[serde(default = "default_boot_reset")]
    pub boot_reset: bool,
}

fn default_send_wait_ms() -> u64 {
    200
}

fn default_boot_reset() -> bool {
    true
}

impl NodeConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn send_wait(&self) -> Duration {
        Duration::from_millis(self.send_wait_ms)
    }
}

/// Per-node capability flags. Copied into each component at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeCapabilities {
    /// Execute `ExecuteCommand` envelopes addressed to this node.
    #[serde(default)]
    pub allow_remote_commands: bool,
    /// Render relevant mesh traffic to the serial host (gateway nodes).
    #[serde(default)]
    pub bridge_mesh_to_serial: bool,
    /// Act on lines typed by the serial host.
    #[serde(default)]
    pub accept_serial_commands: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path; empty means write host lines to stdout.
    #[serde(default)]
    pub port: String,
    pub baud_rate: u32,
    /// Bounded wait for the previous write to complete (ms).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Fixed line payload size; kept in the file for documentation.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

fn default_write_timeout_ms() -> u64 {
    100
}

fn default_max_line_len() -> usize {
    MAX_LINE_PAYLOAD
}

impl SerialConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Bme,
    Light,
    Battery,
    Alive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub kind: JobKind,
    pub period: u32,
    #[serde(default)]
    pub offset: u32,
}

impl JobConfig {
    pub fn new(name: &str, kind: JobKind, period: u32, offset: u32) -> Self {
        JobConfig {
            name: name.to_string(),
            kind,
            period,
            offset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file and validate it.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.serial.write_timeout_ms == 0 {
            return Err(ConfigError::ZeroWriteTimeout);
        }
        if self.serial.max_line_len != MAX_LINE_PAYLOAD {
            return Err(ConfigError::LineLength {
                got: self.serial.max_line_len,
                expected: MAX_LINE_PAYLOAD,
            });
        }
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.period == 0 {
                return Err(ConfigError::ZeroPeriod(job.name.clone()));
            }
            if job.offset >= job.period {
                return Err(ConfigError::OffsetOutOfRange {
                    name: job.name.clone(),
                    offset: job.offset,
                    period: job.period,
                });
            }
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node: NodeConfig {
                node_id: 1,
                tick_ms: 1000,
                send_wait_ms: default_send_wait_ms(),
                boot_reset: true,
            },
            capabilities: NodeCapabilities {
                allow_remote_commands: false,
                bridge_mesh_to_serial: true,
                accept_serial_commands: true,
            },
            serial: SerialConfig {
                port: String::new(),
                baud_rate: 115200,
                write_timeout_ms: default_write_timeout_ms(),
                max_line_len: MAX_LINE_PAYLOAD,
            },
            jobs: vec![
                JobConfig::new("bme", JobKind::Bme, 3, 1),
                JobConfig::new("light", JobKind::Light, 3, 2),
                JobConfig::new("battery", JobKind::Battery, 60, 0),
                JobConfig::new("alive", JobKind::Alive, 60, 30),
            ],
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshnode.log".to_string()),
            },
        }
    }
}
