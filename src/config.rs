//! Configuration for the SetuIO server
//!
//! Loads a TOML file naming the connection to serve on and the devices to
//! instantiate. Each `[[device]]` table carries a `type` plus the parameters
//! that type needs; unused parameters are ignored.
//!
//! ```toml
//! [server]
//! tick_interval_us = 1000
//!
//! [connection]
//! kind = "tcp"
//! bind = "0.0.0.0:3883"
//!
//! [logging]
//! level = "info"
//!
//! [[device]]
//! name = "Tracker0"
//! type = "flock"
//! port = "/dev/ttyUSB0"
//! baud = 115200
//! sensors = 4
//!
//! [[device]]
//! name = "Tracker1"
//! type = "flock_parallel"
//! port = "/dev/ttyS0"
//! slave_ports = ["/dev/ttyS1", "/dev/ttyS2"]
//!
//! [device.recovery]
//! max_resets = 3
//! ```

use crate::acquisition::RecoveryLimits;
use crate::devices::flock::DEFAULT_BAUD;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level server configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Devices in the order they are added to the aggregator
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

/// Tick scheduling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Sleep between aggregator ticks, in microseconds
    pub tick_interval_us: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_us: 1000,
        }
    }
}

/// Which connection the server publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Accept remotes over TCP
    #[default]
    Tcp,
    /// In-process only, for local testing
    Loopback,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub kind: ConnectionKind,
    /// TCP bind address
    ///
    /// Examples:
    /// - `0.0.0.0:3883` - all interfaces
    /// - `127.0.0.1:3883` - localhost only
    pub bind: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: ConnectionKind::Tcp,
            bind: "0.0.0.0:3883".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One device instance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Sender name remotes use to find this device
    pub name: String,
    /// Adapter type: `flock`, `flock_parallel` or `imager_pattern`
    #[serde(rename = "type")]
    pub device_type: String,

    /// Serial port (master port for `flock_parallel`)
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Birds on the port
    #[serde(default = "default_sensors")]
    pub sensors: usize,
    /// Stream mode, or one report per request
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Group report mode; follows `sensors > 1` when unset
    #[serde(default)]
    pub group: Option<bool>,
    /// One port per additional bird (`flock_parallel`)
    #[serde(default)]
    pub slave_ports: Vec<String>,

    /// Image size (`imager_pattern`)
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,

    #[serde(default)]
    pub recovery: RecoveryLimits,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_sensors() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_cols() -> u32 {
    640
}

fn default_rows() -> u32 {
    480
}

impl DeviceConfig {
    /// Group report mode as configured or implied by the sensor count
    pub fn group_mode(&self) -> bool {
        self.group.unwrap_or(self.sensors > 1)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use setu_io::config::Config;
    ///
    /// let config = Config::load("setu.toml")?;
    /// # Ok::<(), setu_io::Error>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.tick_interval_us, 1000);
        assert_eq!(config.connection.kind, ConnectionKind::Tcp);
        assert_eq!(config.logging.level, "info");
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_device_tables() {
        let config = Config::parse(
            r#"
[connection]
kind = "loopback"

[logging]
level = "debug"

[[device]]
name = "Tracker0"
type = "flock"
port = "/dev/ttyUSB0"
baud = 115200
sensors = 4

[[device]]
name = "Tracker1"
type = "flock_parallel"
port = "/dev/ttyS0"
slave_ports = ["/dev/ttyS1", "/dev/ttyS2"]

[device.recovery]
max_resets = 3

[[device]]
name = "Pattern"
type = "imager_pattern"
cols = 320
"#,
        )
        .unwrap();

        assert_eq!(config.connection.kind, ConnectionKind::Loopback);
        assert_eq!(config.devices.len(), 3);

        let flock = &config.devices[0];
        assert_eq!(flock.device_type, "flock");
        assert_eq!(flock.baud, 115_200);
        assert!(flock.group_mode());
        assert!(flock.stream);

        let parallel = &config.devices[1];
        assert_eq!(parallel.baud, DEFAULT_BAUD);
        assert_eq!(parallel.slave_ports.len(), 2);
        assert_eq!(parallel.recovery.max_resets, 3);
        assert_eq!(parallel.recovery.max_sync_failures, 10);

        let pattern = &config.devices[2];
        assert_eq!((pattern.cols, pattern.rows), (320, 480));
        assert_eq!(pattern.recovery, RecoveryLimits::default());
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = Config::parse("[[device]]\nname = 3").unwrap_err();
        assert!(matches!(err, crate::error::Error::ConfigParse(_)));
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[server]"));
        assert!(text.contains("tick_interval_us = 1000"));
        let back = Config::parse(&text).unwrap();
        assert_eq!(back.connection.bind, "0.0.0.0:3883");
    }
}
