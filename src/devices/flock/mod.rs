//! Ascension Flock of Birds tracker
//!
//! - [`protocol`]: commands, record layout, error codes
//! - [`session`]: one port as a resettable acquisition state machine
//! - [`parallel`]: one port per bird under a single tracker identity
//!
//! Reports are stamped with the time their first byte was read; no latency
//! compensation is applied.

pub mod parallel;
pub mod protocol;
pub mod session;

pub use parallel::ParallelGroup;
pub use protocol::{DEFAULT_BAUD, FlockFormat, MAX_SENSORS};
pub use session::{ConfigStep, FlockSession, Role, SessionConfig, SessionState};

use crate::connection::SharedConnection;
use crate::core::Device;
use crate::core::types::Capability;
use crate::error::{Error, Result};
use crate::tracker::PosePublisher;
use crate::transport::PortOpener;

/// Flock on a single serial port
pub struct FlockTracker {
    name: String,
    session: FlockSession,
    publisher: PosePublisher,
}

impl FlockTracker {
    pub fn new(
        name: &str,
        config: SessionConfig,
        opener: Box<dyn PortOpener>,
        connection: SharedConnection,
    ) -> Result<Self> {
        if config.sensors == 0 || config.sensors > MAX_SENSORS {
            return Err(Error::Config(format!(
                "{}: {} sensors, expected 1..={}",
                name, config.sensors, MAX_SENSORS
            )));
        }
        if config.sensors > 1 && !config.group {
            return Err(Error::Config(format!(
                "{}: {} birds on one port need group report mode",
                name, config.sensors
            )));
        }
        log::info!(
            "{}: flock on {} at {} baud, {} sensor(s)",
            name,
            config.port,
            config.baud,
            config.sensors
        );
        Ok(Self {
            name: name.to_string(),
            session: FlockSession::new(config, opener),
            publisher: PosePublisher::new(name, connection),
        })
    }

    pub fn session(&self) -> &FlockSession {
        &self.session
    }
}

impl Device for FlockTracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ProducesPoses]
    }

    fn poll(&mut self) -> Result<usize> {
        let Some(poses) = self.session.poll()? else {
            return Ok(0);
        };
        for pose in poses {
            self.publisher.publish(pose)?;
        }
        Ok(poses.len())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.session.shutdown();
        Ok(())
    }
}
