//! Configuration schema definitions.
//!
//! Every section carries `#[serde(default)]`, so a file only needs the keys
//! it wants to change.

use super::error::{ConfigError, ConfigResult};
use crate::port::{ChannelSettings, DataBits, FlowControl, Parity, StopBits};
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Line settings and connection defaults
    pub serial: SerialConfig,
    /// Background read loop
    pub read_loop: ReadLoopConfig,
    /// In-memory activity logs
    pub activity: ActivityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the transport cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation(
                "serial.default_baud",
                "must be a positive integer",
            ));
        }
        if self.read_loop.read_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "read_loop.read_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.read_loop.chunk_size == 0 {
            return Err(ConfigError::validation(
                "read_loop.chunk_size",
                "must be greater than zero",
            ));
        }
        if self.activity.capacity == 0 {
            return Err(ConfigError::validation(
                "activity.capacity",
                "must be greater than zero",
            ));
        }
        if self.activity.received_capacity == 0 {
            return Err(ConfigError::validation(
                "activity.received_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Session options derived from the `[serial]` and `[read_loop]` sections.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            settings: ChannelSettings {
                baud_rate: self.serial.default_baud,
                data_bits: self.serial.data_bits,
                flow_control: self.serial.flow_control,
                parity: self.serial.parity,
                stop_bits: self.serial.stop_bits,
                timeout: self.read_loop.read_timeout(),
            },
            initial_dtr: self.serial.initial_dtr,
            initial_rts: self.serial.initial_rts,
            read_chunk: self.read_loop.chunk_size,
        }
    }
}

/// Serial line configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate used when a command does not name one
    pub default_baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// DTR level driven right after connecting
    pub initial_dtr: bool,
    /// RTS level driven right after connecting
    pub initial_rts: bool,
    /// Port aliases for convenience
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            initial_dtr: true,
            initial_rts: true,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Read loop configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadLoopConfig {
    /// Wait per read in milliseconds
    pub read_timeout_ms: u64,
    /// Maximum bytes returned by one read
    pub chunk_size: usize,
}

impl Default for ReadLoopConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            chunk_size: 1024,
        }
    }
}

impl ReadLoopConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Activity log configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Entries kept in the general activity log
    pub capacity: usize,
    /// Entries kept in the received-data log
    pub received_capacity: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            received_capacity: 100,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}
