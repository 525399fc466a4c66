//! Device implementations
//!
//! [`create_device`] turns one `[[device]]` configuration table into a
//! boxed [`Device`] for the aggregator.

pub mod flock;
pub mod pattern;

use crate::config::DeviceConfig;
use crate::connection::SharedConnection;
use crate::core::Device;
use crate::error::{Error, Result};
use crate::transport::{PortOpener, SerialOpener};
use flock::{FlockTracker, ParallelGroup, Role, SessionConfig};
use pattern::PatternImager;

/// Create a device on real serial ports
pub fn create_device(config: &DeviceConfig, connection: SharedConnection) -> Result<Box<dyn Device>> {
    create_device_with(config, connection, SerialOpener)
}

/// Create a device whose ports are opened by `opener`
pub fn create_device_with<O>(
    config: &DeviceConfig,
    connection: SharedConnection,
    opener: O,
) -> Result<Box<dyn Device>>
where
    O: PortOpener + Clone + 'static,
{
    match config.device_type.as_str() {
        "flock" => {
            let session = SessionConfig {
                port: required_port(config)?,
                baud: config.baud,
                sensors: config.sensors,
                stream: config.stream,
                group: config.group_mode(),
                role: Role::Standalone,
                first_sensor: 0,
                limits: config.recovery,
            };
            let tracker = FlockTracker::new(&config.name, session, Box::new(opener), connection)?;
            Ok(Box::new(tracker))
        }
        "flock_parallel" => {
            let group = ParallelGroup::new(
                &config.name,
                &required_port(config)?,
                &config.slave_ports,
                config.baud,
                config.recovery,
                opener,
                connection,
            )?;
            Ok(Box::new(group))
        }
        "imager_pattern" => {
            let imager = PatternImager::new(&config.name, config.cols, config.rows, connection)?;
            Ok(Box::new(imager))
        }
        _ => Err(Error::UnknownDevice(config.device_type.clone())),
    }
}

fn required_port(config: &DeviceConfig) -> Result<String> {
    config
        .port
        .clone()
        .ok_or_else(|| Error::Config(format!("{}: no port configured", config.name)))
}
